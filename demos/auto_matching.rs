//! Statement import and automatic matching example

use chrono::NaiveDate;
use reconciliation_core::utils::{
    MemoryPatternStore, MemoryRecordService, MemoryTransactionStore,
};
use reconciliation_core::{
    AmountCriterion, CoreConfig, DescriptionCriterion, Direction, ImportedLine, LedgerRecord,
    MatchCriterion, MatchResolver, MatchRule, RecordRef, RecordType, ResolutionResult, RuleAction,
    StatementImporter, TransactionStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🏦 Reconciliation Core - Auto Matching Example\n");

    let transactions = MemoryTransactionStore::new();
    let records = MemoryRecordService::new();

    // 1. Open invoices waiting to be settled
    println!("📄 Seeding open invoices...");
    for (id, amount, description) in [
        ("inv-203", 150_000, "ACME invoice 203"),
        ("inv-204", 88_500, "ACME invoice 204"),
        ("inv-117", 42_000, "Globex invoice 117"),
    ] {
        records.insert(LedgerRecord {
            record_ref: RecordRef::new(RecordType::Invoice, id),
            posted_on: NaiveDate::from_ymd_opt(2024, 5, 5).unwrap(),
            amount,
            description: description.to_string(),
            reference: None,
            counterparty: None,
            open: true,
        });
        println!("  ✓ {id}: {description} ({amount} minor units)");
    }
    println!();

    // 2. Import a statement batch
    println!("📥 Importing bank statement...");
    let mut importer = StatementImporter::new(transactions.clone());
    let lines = vec![
        ImportedLine {
            account_id: "operating".to_string(),
            posted_on: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            direction: Direction::Credit,
            amount: 150_000,
            description: "ACME CO INV-203".to_string(),
            reference: None,
        },
        ImportedLine {
            account_id: "operating".to_string(),
            posted_on: NaiveDate::from_ymd_opt(2024, 5, 11).unwrap(),
            direction: Direction::Credit,
            amount: 88_500,
            description: "ACME CO INV-204".to_string(),
            reference: None,
        },
    ];
    let summary = importer.import(&lines).await?;
    println!(
        "  ✓ Imported {} lines, {} duplicates skipped\n",
        summary.imported, summary.duplicates
    );

    // 3. One rule: exact amount plus an ACME description
    let rule = MatchRule::new(
        "ACME invoices",
        1,
        vec![
            MatchCriterion::Amount(AmountCriterion::Exact),
            MatchCriterion::Description(DescriptionCriterion::contains("ACME")),
        ],
        RuleAction::AutoMatch,
    );

    // 4. Resolve every imported transaction
    println!("🔍 Resolving transactions...");
    let mut resolver = MatchResolver::new(
        transactions.clone(),
        MemoryPatternStore::new(),
        records,
        CoreConfig::default(),
    );
    let imported = transactions
        .list_transactions("operating", None, None, None)
        .await?;
    for transaction in imported {
        match resolver.resolve(transaction.id, &[rule.clone()]).await? {
            ResolutionResult::AutoMatched(m) => println!(
                "  ✓ '{}' auto-matched to {} (score {:.0})",
                transaction.description, m.target.record_id, m.score
            ),
            ResolutionResult::Suggestions(candidates) => println!(
                "  ? '{}' has {} candidate(s) awaiting review",
                transaction.description,
                candidates.len()
            ),
        }
    }

    Ok(())
}
