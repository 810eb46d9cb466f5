//! Three-way trust account reconciliation example

use chrono::NaiveDate;
use reconciliation_core::utils::{
    MemoryReconciliationStore, MemoryTransactionStore, MemoryTrustLedger, RecordingGeneralLedger,
};
use reconciliation_core::{
    BankTransaction, Direction, ReconciliationConfig, ReconciliationLedger, ReconciliationStatus,
    TransactionStatus, TransactionStore, TrustReconciliationLedger,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("⚖️  Reconciliation Core - Trust Reconciliation Example\n");

    // Matched activity on the trust account for May
    let mut transactions = MemoryTransactionStore::new();
    let mut retainer = BankTransaction::new(
        "trust".to_string(),
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        Direction::Credit,
        500_000,
        "client retainer".to_string(),
        None,
        uuid::Uuid::new_v4(),
    );
    retainer.status = TransactionStatus::Confirmed;
    transactions.save_transaction(&retainer).await?;

    // Client sub-ledgers start out 20_000 short of the books
    let clients = MemoryTrustLedger::new();
    clients.set_total("trust", 5_520_000);

    let general_ledger = RecordingGeneralLedger::new();
    let inner = ReconciliationLedger::new(
        transactions,
        MemoryReconciliationStore::new(),
        general_ledger.clone(),
        ReconciliationConfig::default(),
    );
    let mut ledger = TrustReconciliationLedger::new(inner, clients.clone());

    println!("📅 Opening May for the trust account...");
    let recon = ledger
        .ledger()
        .start(
            "trust",
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
            5_000_000,
            5_500_000,
        )
        .await?;
    ledger.ledger().begin_work(recon.id).await?;

    // First attempt: client ledgers claim more than the account holds
    let attempt = ledger.complete(recon.id).await?;
    println!(
        "  ✗ Completion blocked: {:?}, {} discrepanc(ies) recorded",
        attempt.reconciliation.status,
        attempt.reconciliation.discrepancies.len()
    );
    for discrepancy in &attempt.reconciliation.discrepancies {
        println!(
            "    - {:?}: {} ({})",
            discrepancy.category, discrepancy.amount, discrepancy.note
        );
    }
    println!();

    // The sub-ledger error is corrected and completion succeeds
    println!("🔧 Correcting the client sub-ledgers...");
    clients.set_total("trust", 5_500_000);
    let closed = ledger.complete(recon.id).await?;
    assert_eq!(closed.reconciliation.status, ReconciliationStatus::Completed);
    println!(
        "  ✓ Bank {}, book {}, client ledgers {} all agree",
        closed.reconciliation.statement_balance,
        closed.reconciliation.book_balance(),
        closed.client_ledger_total
    );
    println!(
        "  ✓ Compliance records posted downstream: {}",
        general_ledger.recorded_compliance()
    );

    Ok(())
}
