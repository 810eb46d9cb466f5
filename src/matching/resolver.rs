//! Match resolution: candidate gathering, ranking, auto-confirmation and the
//! confirm/reject lifecycle

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::matching::patterns::PatternLearner;
use crate::matching::rules::{MatchRule, RuleEngine};
use crate::traits::{PatternStore, RecordService, TransactionStore};
use crate::types::*;

/// What resolution decided for one transaction
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionResult {
    /// A unique high-confidence candidate was committed without review
    AutoMatched(TransactionMatch),
    /// Ranked candidates awaiting a human decision; may be empty
    Suggestions(Vec<CandidateMatch>),
}

/// Drives the full matching lifecycle for bank transactions
///
/// Owns the rule engine, the pattern learner and the injected stores. All
/// decisions flow through here so that record application, match persistence,
/// transaction status and pattern learning stay consistent with each other.
pub struct MatchResolver<T, P, R>
where
    T: TransactionStore,
    P: PatternStore,
    R: RecordService,
{
    transactions: T,
    learner: PatternLearner<P>,
    records: R,
    engine: RuleEngine,
    config: CoreConfig,
}

impl<T, P, R> MatchResolver<T, P, R>
where
    T: TransactionStore,
    P: PatternStore,
    R: RecordService,
{
    pub fn new(transactions: T, patterns: P, records: R, config: CoreConfig) -> Self {
        Self {
            transactions,
            learner: PatternLearner::new(patterns, config.patterns.clone()),
            records,
            engine: RuleEngine::new(config.matching.clone()),
            config,
        }
    }

    /// Resolve one transaction against the rule set
    ///
    /// Gathers candidates from reference equality, rules and learned patterns,
    /// blends and ranks them, and either auto-confirms a unique
    /// high-confidence winner or persists the transaction as suggested.
    /// Targets the user has already rejected for this transaction stay out
    /// of consideration. Re-resolving a suggested transaction refreshes its
    /// candidate list but never auto-confirms; only an untouched transaction
    /// may be committed without review.
    pub async fn resolve(
        &mut self,
        transaction_id: Uuid,
        rules: &[MatchRule],
    ) -> ReconResult<ResolutionResult> {
        let mut transaction = self.require_transaction(transaction_id).await?;
        if !transaction.is_open_for_matching() {
            return Err(ReconError::InvalidTransition(format!(
                "transaction {} is {:?}, not open for matching",
                transaction.id, transaction.status
            )));
        }

        let pool = match self
            .records
            .find_candidates(
                &transaction.account_id,
                transaction.posted_on,
                self.config.matching.candidate_window_days,
            )
            .await
        {
            Ok(pool) => pool,
            Err(e) => {
                // A record service outage degrades to "no candidates" rather
                // than failing resolution
                warn!(transaction = %transaction.id, error = %e, "candidate lookup failed");
                Vec::new()
            }
        };

        let rejected_targets = self.rejected_targets(transaction.id).await?;
        let reference_hits: Vec<CandidateMatch> = self
            .reference_equality_pass(&transaction, &pool)
            .into_iter()
            .filter(|c| !rejected_targets.contains(&c.target))
            .collect();
        if reference_hits.len() == 1 && transaction.status == TransactionStatus::Unmatched {
            let winner = reference_hits.into_iter().next().ok_or_else(|| {
                ReconError::Validation("reference pre-pass lost its candidate".to_string())
            })?;
            let committed = self
                .commit(&mut transaction, &winner, MatchStatus::AutoConfirmed, None)
                .await?;
            info!(
                transaction = %transaction.id,
                target = %committed.target.record_id,
                "auto-matched by reference equality"
            );
            return Ok(ResolutionResult::AutoMatched(committed));
        }

        let rule_candidates = self.engine.evaluate(&transaction, &pool, rules);
        let pattern_candidates = self.learner.suggest(&transaction, &pool).await?;
        let ranked = self.rank(
            &rejected_targets,
            reference_hits,
            rule_candidates,
            pattern_candidates,
        );

        if let Some(top) = ranked.first() {
            let runner_up_gap = ranked
                .get(1)
                .map(|second| top.score - second.score)
                .unwrap_or(f64::MAX);
            let action_allows_auto = matches!(
                top.action,
                None | Some(RuleAction::AutoMatch) | Some(RuleAction::AutoReconcile)
            );
            let auto = transaction.status == TransactionStatus::Unmatched
                && top.score >= self.config.matching.auto_confirm_threshold
                && runner_up_gap > self.config.matching.score_tie_margin
                && action_allows_auto;

            if auto {
                let winner = top.clone();
                let committed = self
                    .commit(&mut transaction, &winner, MatchStatus::AutoConfirmed, None)
                    .await?;
                info!(
                    transaction = %transaction.id,
                    target = %committed.target.record_id,
                    score = committed.score,
                    "auto-matched"
                );
                return Ok(ResolutionResult::AutoMatched(committed));
            }
        }

        if !ranked.is_empty() && transaction.status == TransactionStatus::Unmatched {
            transaction.status = TransactionStatus::Suggested;
            transaction.updated_at = Utc::now().naive_utc();
            self.transactions.update_transaction(&transaction).await?;
        }
        debug!(transaction = %transaction.id, candidates = ranked.len(), "resolution suggested");
        Ok(ResolutionResult::Suggestions(ranked))
    }

    /// Confirm a reviewed candidate for a transaction
    ///
    /// Confirming the same pairing again returns the existing match
    /// unchanged; confirming a different one on a settled transaction is an
    /// invalid transition.
    pub async fn confirm_match(
        &mut self,
        transaction_id: Uuid,
        candidate: &CandidateMatch,
        decided_by: &str,
    ) -> ReconResult<TransactionMatch> {
        let mut transaction = self.require_transaction(transaction_id).await?;
        if !transaction.is_open_for_matching() {
            if transaction.status == TransactionStatus::Confirmed {
                if let Some(match_id) = transaction.match_id {
                    if let Some(existing) = self.transactions.get_match(match_id).await? {
                        if existing.status.is_confirmed() && existing.target == candidate.target {
                            return Ok(existing);
                        }
                    }
                }
            }
            return Err(ReconError::InvalidTransition(format!(
                "transaction {} is {:?}, cannot confirm a match",
                transaction.id, transaction.status
            )));
        }
        self.commit(
            &mut transaction,
            candidate,
            MatchStatus::Confirmed,
            Some(decided_by.to_string()),
        )
        .await
    }

    /// Confirm a manually selected record that never appeared as a candidate
    pub async fn confirm_manual(
        &mut self,
        transaction_id: Uuid,
        target: RecordRef,
        decided_by: &str,
    ) -> ReconResult<TransactionMatch> {
        let record = self.records.get_record(&target).await?.ok_or_else(|| {
            ReconError::RecordUnavailable(format!("{:?} {}", target.record_type, target.record_id))
        })?;
        let candidate = CandidateMatch::new(
            target,
            record.posted_on,
            100.0,
            MatchSource::Manual,
            vec![format!("manually selected by {decided_by}")],
        );
        self.confirm_match(transaction_id, &candidate, decided_by).await
    }

    /// Reject a suggested candidate, recording the decision for audit and
    /// feeding it back to the pattern learner
    ///
    /// The transaction returns to unmatched. Rejecting the same target again
    /// returns the recorded decision without learning a second time, so a
    /// repeated click cannot double-penalize a pattern.
    pub async fn reject_match(
        &mut self,
        transaction_id: Uuid,
        candidate: &CandidateMatch,
        decided_by: &str,
    ) -> ReconResult<TransactionMatch> {
        let mut transaction = self.require_transaction(transaction_id).await?;
        if !transaction.is_open_for_matching() {
            return Err(ReconError::InvalidTransition(format!(
                "transaction {} is {:?}, cannot reject a match",
                transaction.id, transaction.status
            )));
        }

        let prior = self
            .transactions
            .list_matches_for_transaction(transaction.id)
            .await?;
        if let Some(existing) = prior
            .into_iter()
            .find(|m| m.status == MatchStatus::Rejected && m.target == candidate.target)
        {
            return Ok(existing);
        }

        let mut rejected = TransactionMatch::new(
            transaction.id,
            candidate.target.clone(),
            candidate.score,
            candidate.source,
            candidate.reasons.clone(),
            MatchStatus::Rejected,
        );
        rejected.decided_by = Some(decided_by.to_string());
        rejected.decided_at = Some(Utc::now().naive_utc());
        self.transactions.save_match(&rejected).await?;

        if transaction.status == TransactionStatus::Suggested {
            transaction.status = TransactionStatus::Unmatched;
            transaction.updated_at = Utc::now().naive_utc();
            self.transactions.update_transaction(&transaction).await?;
        }

        if let Err(e) = self
            .learner
            .learn(&transaction, &rejected, MatchOutcome::Rejected)
            .await
        {
            warn!(transaction = %transaction.id, error = %e, "pattern learning failed");
        }
        Ok(rejected)
    }

    /// Confirm a split of one transaction across several records
    ///
    /// Splits are always an explicit human decision. The allocations must sum
    /// to the transaction amount within the configured rounding tolerance;
    /// every record is applied, and a failure part-way through releases the
    /// records already applied.
    pub async fn confirm_split(
        &mut self,
        transaction_id: Uuid,
        allocations: Vec<SplitAllocation>,
        decided_by: &str,
    ) -> ReconResult<TransactionMatch> {
        let mut transaction = self.require_transaction(transaction_id).await?;
        if !transaction.is_open_for_matching() {
            return Err(ReconError::InvalidTransition(format!(
                "transaction {} is {:?}, cannot split",
                transaction.id, transaction.status
            )));
        }
        if allocations.is_empty() {
            return Err(ReconError::Validation(
                "a split needs at least one allocation".to_string(),
            ));
        }
        let total: i64 = allocations.iter().map(|a| a.amount).sum();
        if (total - transaction.amount).abs() > self.config.matching.split_rounding_tolerance {
            return Err(ReconError::SplitMismatch {
                expected: transaction.amount,
                actual: total,
            });
        }

        for allocation in &allocations {
            let record = self.records.get_record(&allocation.target).await?;
            match record {
                Some(r) if r.open => {}
                Some(_) => {
                    return Err(ReconError::RecordUnavailable(format!(
                        "{:?} {} is no longer open",
                        allocation.target.record_type, allocation.target.record_id
                    )))
                }
                None => {
                    return Err(ReconError::RecordUnavailable(format!(
                        "{:?} {}",
                        allocation.target.record_type, allocation.target.record_id
                    )))
                }
            }
        }

        let reference = transaction.id.to_string();
        let mut applied: Vec<&SplitAllocation> = Vec::new();
        for allocation in &allocations {
            if let Err(e) = self
                .records
                .apply_match(&allocation.target, allocation.amount, &reference)
                .await
            {
                for done in applied {
                    if let Err(undo) = self.records.release_match(&done.target, &reference).await {
                        warn!(
                            target = %done.target.record_id,
                            error = %undo,
                            "failed to release record while unwinding split"
                        );
                    }
                }
                return Err(e);
            }
            applied.push(allocation);
        }

        let first_target = allocations[0].target.clone();
        let mut split = TransactionMatch::new(
            transaction.id,
            first_target,
            100.0,
            MatchSource::Manual,
            vec![format!("split across {} records", allocations.len())],
            MatchStatus::Confirmed,
        );
        split.splits = allocations;
        split.decided_by = Some(decided_by.to_string());
        split.decided_at = Some(Utc::now().naive_utc());
        self.transactions.save_match(&split).await?;

        transaction.status = TransactionStatus::Confirmed;
        transaction.match_id = Some(split.id);
        transaction.updated_at = Utc::now().naive_utc();
        if let Err(e) = self.transactions.update_transaction(&transaction).await {
            for allocation in &split.splits {
                if let Err(undo) = self
                    .records
                    .release_match(&allocation.target, &reference)
                    .await
                {
                    warn!(
                        target = %allocation.target.record_id,
                        error = %undo,
                        "failed to release record while unwinding split"
                    );
                }
            }
            split.status = MatchStatus::Rejected;
            if let Err(undo) = self.transactions.update_match(&split).await {
                warn!(match_id = %split.id, error = %undo, "failed to void match during unwind");
            }
            return Err(e);
        }
        Ok(split)
    }

    /// Exclude a transaction from matching and reconciliation
    pub async fn ignore_transaction(&mut self, transaction_id: Uuid) -> ReconResult<BankTransaction> {
        let mut transaction = self.require_transaction(transaction_id).await?;
        match transaction.status {
            TransactionStatus::Ignored => Ok(transaction),
            TransactionStatus::Unmatched | TransactionStatus::Suggested => {
                transaction.status = TransactionStatus::Ignored;
                transaction.updated_at = Utc::now().naive_utc();
                self.transactions.update_transaction(&transaction).await?;
                Ok(transaction)
            }
            other => Err(ReconError::InvalidTransition(format!(
                "cannot ignore a {:?} transaction",
                other
            ))),
        }
    }

    /// Bring an ignored transaction back into matching
    pub async fn restore_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> ReconResult<BankTransaction> {
        let mut transaction = self.require_transaction(transaction_id).await?;
        match transaction.status {
            TransactionStatus::Unmatched => Ok(transaction),
            TransactionStatus::Ignored => {
                transaction.status = TransactionStatus::Unmatched;
                transaction.updated_at = Utc::now().naive_utc();
                self.transactions.update_transaction(&transaction).await?;
                Ok(transaction)
            }
            other => Err(ReconError::InvalidTransition(format!(
                "cannot restore a {:?} transaction",
                other
            ))),
        }
    }

    async fn require_transaction(&self, id: Uuid) -> ReconResult<BankTransaction> {
        self.transactions
            .get_transaction(id)
            .await?
            .ok_or_else(|| ReconError::TransactionNotFound(id.to_string()))
    }

    /// Targets the user has already turned down for this transaction
    async fn rejected_targets(&self, transaction_id: Uuid) -> ReconResult<HashSet<RecordRef>> {
        Ok(self
            .transactions
            .list_matches_for_transaction(transaction_id)
            .await?
            .into_iter()
            .filter(|m| m.status == MatchStatus::Rejected)
            .map(|m| m.target)
            .collect())
    }

    /// Records whose reference and amount both equal the transaction's
    fn reference_equality_pass(
        &self,
        transaction: &BankTransaction,
        pool: &[LedgerRecord],
    ) -> Vec<CandidateMatch> {
        let reference = match transaction.reference.as_deref() {
            Some(r) if !r.is_empty() => r,
            _ => return Vec::new(),
        };
        pool.iter()
            .filter(|record| {
                record.open
                    && record.amount == transaction.amount
                    && record
                        .reference
                        .as_deref()
                        .map(|r| r.eq_ignore_ascii_case(reference))
                        .unwrap_or(false)
            })
            .map(|record| {
                CandidateMatch::new(
                    record.record_ref.clone(),
                    record.posted_on,
                    100.0,
                    MatchSource::ReferenceEquality,
                    vec![format!("reference '{reference}' and amount both equal")],
                )
            })
            .collect()
    }

    /// Blend candidates across sources, drop the weak and the already
    /// rejected, and order the rest
    ///
    /// Per target and source only the best score survives. A target seen by
    /// more than one source takes the strongest score plus a quarter of the
    /// next, capped at 100: independent agreement is worth more than either
    /// signal alone. Ordering is fully deterministic.
    fn rank(
        &self,
        rejected: &HashSet<RecordRef>,
        reference: Vec<CandidateMatch>,
        rule: Vec<CandidateMatch>,
        pattern: Vec<CandidateMatch>,
    ) -> Vec<CandidateMatch> {
        let mut by_target: HashMap<RecordRef, CandidateMatch> = HashMap::new();
        for candidate in reference.into_iter().chain(rule).chain(pattern) {
            match by_target.remove(&candidate.target) {
                None => {
                    by_target.insert(candidate.target.clone(), candidate);
                }
                Some(existing) => {
                    let combined = combine(existing, candidate);
                    by_target.insert(combined.target.clone(), combined);
                }
            }
        }

        let mut ranked: Vec<CandidateMatch> = by_target
            .into_values()
            .filter(|c| c.score >= self.config.matching.min_display_score)
            .filter(|c| !rejected.contains(&c.target))
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.tier.cmp(&a.tier))
                .then(b.record_date.cmp(&a.record_date))
                .then(a.target.record_id.cmp(&b.target.record_id))
        });
        ranked
    }

    /// Apply a candidate to its record, persist the match, update the
    /// transaction and reinforce the pattern, unwinding on failure
    async fn commit(
        &mut self,
        transaction: &mut BankTransaction,
        candidate: &CandidateMatch,
        status: MatchStatus,
        decided_by: Option<String>,
    ) -> ReconResult<TransactionMatch> {
        match self.records.get_record(&candidate.target).await? {
            Some(r) if r.open => {}
            Some(_) => {
                return Err(ReconError::RecordUnavailable(format!(
                    "{:?} {} is no longer open",
                    candidate.target.record_type, candidate.target.record_id
                )))
            }
            None => {
                // The record vanished between suggestion and decision
                if transaction.status == TransactionStatus::Suggested {
                    transaction.status = TransactionStatus::Unmatched;
                    transaction.updated_at = Utc::now().naive_utc();
                    self.transactions.update_transaction(transaction).await?;
                }
                return Err(ReconError::RecordInconsistency(format!(
                    "{:?} {} no longer exists",
                    candidate.target.record_type, candidate.target.record_id
                )));
            }
        }

        let reference = transaction.id.to_string();
        self.records
            .apply_match(&candidate.target, transaction.amount, &reference)
            .await?;

        let mut committed = TransactionMatch::new(
            transaction.id,
            candidate.target.clone(),
            candidate.score,
            candidate.source,
            candidate.reasons.clone(),
            status,
        );
        committed.decided_by = decided_by;
        committed.decided_at = Some(Utc::now().naive_utc());

        if let Err(e) = self.transactions.save_match(&committed).await {
            self.unwind_record(&candidate.target, &reference).await;
            return Err(e);
        }

        transaction.status = TransactionStatus::Confirmed;
        transaction.match_id = Some(committed.id);
        transaction.updated_at = Utc::now().naive_utc();
        if let Err(e) = self.transactions.update_transaction(transaction).await {
            self.unwind_record(&candidate.target, &reference).await;
            // Void the match so no confirmed match survives without its
            // transaction linkage
            committed.status = MatchStatus::Rejected;
            if let Err(undo) = self.transactions.update_match(&committed).await {
                warn!(match_id = %committed.id, error = %undo, "failed to void match during unwind");
            }
            return Err(e);
        }

        // Learning is advisory; a pattern store hiccup never rolls back a
        // committed business decision
        if let Err(e) = self
            .learner
            .learn(transaction, &committed, MatchOutcome::Confirmed)
            .await
        {
            warn!(transaction = %transaction.id, error = %e, "pattern learning failed");
        }
        Ok(committed)
    }

    async fn unwind_record(&mut self, target: &RecordRef, reference: &str) {
        if let Err(e) = self.records.release_match(target, reference).await {
            warn!(target = %target.record_id, error = %e, "failed to release record during unwind");
        }
    }
}

fn combine(a: CandidateMatch, b: CandidateMatch) -> CandidateMatch {
    if a.source == b.source {
        return if b.score > a.score { b } else { a };
    }
    let (hi, lo) = if b.score > a.score { (b, a) } else { (a, b) };
    let score = (hi.score + 0.25 * lo.score).min(100.0);
    let mut reasons = hi.reasons;
    reasons.extend(lo.reasons);
    let mut blended = CandidateMatch::new(hi.target, hi.record_date, score, hi.source, reasons);
    blended.action = hi.action.or(lo.action);
    blended
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::rules::{AmountCriterion, DescriptionCriterion, MatchCriterion};
    use crate::utils::{MemoryPatternStore, MemoryRecordService, MemoryTransactionStore};
    use chrono::NaiveDate;

    fn resolver(
        records: MemoryRecordService,
        transactions: MemoryTransactionStore,
    ) -> MatchResolver<MemoryTransactionStore, MemoryPatternStore, MemoryRecordService> {
        MatchResolver::new(
            transactions,
            MemoryPatternStore::new(),
            records,
            CoreConfig::default(),
        )
    }

    fn txn(amount: i64, description: &str) -> BankTransaction {
        BankTransaction::new(
            "operating".to_string(),
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            Direction::Credit,
            amount,
            description.to_string(),
            None,
            Uuid::new_v4(),
        )
    }

    fn invoice(id: &str, amount: i64, description: &str) -> LedgerRecord {
        LedgerRecord {
            record_ref: RecordRef::new(RecordType::Invoice, id),
            posted_on: NaiveDate::from_ymd_opt(2024, 5, 9).unwrap(),
            amount,
            description: description.to_string(),
            reference: None,
            counterparty: None,
            open: true,
        }
    }

    fn acme_rule() -> MatchRule {
        MatchRule::new(
            "ACME invoices",
            1,
            vec![
                MatchCriterion::Amount(AmountCriterion::Exact),
                MatchCriterion::Description(DescriptionCriterion::contains("ACME")),
            ],
            RuleAction::AutoMatch,
        )
    }

    async fn seeded(
        transaction: &BankTransaction,
        pool: Vec<LedgerRecord>,
    ) -> (
        MatchResolver<MemoryTransactionStore, MemoryPatternStore, MemoryRecordService>,
        MemoryTransactionStore,
        MemoryRecordService,
    ) {
        let mut transactions = MemoryTransactionStore::new();
        transactions.save_transaction(transaction).await.unwrap();
        let records = MemoryRecordService::new();
        for record in pool {
            records.insert(record);
        }
        (
            resolver(records.clone(), transactions.clone()),
            transactions,
            records,
        )
    }

    #[tokio::test]
    async fn unique_rule_hit_auto_matches() {
        let transaction = txn(150_000, "ACME CO INV-203");
        let (mut resolver, transactions, records) =
            seeded(&transaction, vec![invoice("inv-1", 150_000, "ACME invoice")]).await;

        let result = resolver.resolve(transaction.id, &[acme_rule()]).await.unwrap();
        let committed = match result {
            ResolutionResult::AutoMatched(m) => m,
            other => panic!("expected auto-match, got {other:?}"),
        };
        assert_eq!(committed.status, MatchStatus::AutoConfirmed);
        assert_eq!(committed.target.record_id, "inv-1");

        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Confirmed);
        assert_eq!(stored.match_id, Some(committed.id));

        let record = records
            .get_record(&committed.target)
            .await
            .unwrap()
            .unwrap();
        assert!(!record.open);
    }

    #[tokio::test]
    async fn ambiguous_candidates_suggest_instead_of_committing() {
        let transaction = txn(150_000, "ACME CO payment");
        let (mut resolver, transactions, _records) = seeded(
            &transaction,
            vec![
                invoice("inv-1", 150_000, "ACME invoice March"),
                invoice("inv-2", 150_000, "ACME invoice April"),
            ],
        )
        .await;

        let result = resolver.resolve(transaction.id, &[acme_rule()]).await.unwrap();
        let suggestions = match result {
            ResolutionResult::Suggestions(s) => s,
            other => panic!("expected suggestions, got {other:?}"),
        };
        assert_eq!(suggestions.len(), 2);

        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Suggested);
    }

    #[tokio::test]
    async fn reference_equality_pre_pass_wins() {
        let mut transaction = txn(150_000, "payment received");
        transaction.reference = Some("INV-203".to_string());
        let mut target = invoice("inv-1", 150_000, "invoice 203");
        target.reference = Some("inv-203".to_string());
        let decoy = invoice("inv-2", 150_000, "another invoice");
        let (mut resolver, _transactions, _records) =
            seeded(&transaction, vec![target, decoy]).await;

        let result = resolver.resolve(transaction.id, &[]).await.unwrap();
        match result {
            ResolutionResult::AutoMatched(m) => {
                assert_eq!(m.source, MatchSource::ReferenceEquality);
                assert_eq!(m.target.record_id, "inv-1");
            }
            other => panic!("expected auto-match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirming_a_suggestion_applies_and_learns() {
        let transaction = txn(150_000, "ACME CO payment");
        let (mut resolver, transactions, records) = seeded(
            &transaction,
            vec![
                invoice("inv-1", 150_000, "ACME invoice March"),
                invoice("inv-2", 150_000, "ACME invoice April"),
            ],
        )
        .await;

        let suggestions = match resolver.resolve(transaction.id, &[acme_rule()]).await.unwrap() {
            ResolutionResult::Suggestions(s) => s,
            other => panic!("expected suggestions, got {other:?}"),
        };

        let committed = resolver
            .confirm_match(transaction.id, &suggestions[0], "jane")
            .await
            .unwrap();
        assert_eq!(committed.status, MatchStatus::Confirmed);
        assert_eq!(committed.decided_by.as_deref(), Some("jane"));

        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Confirmed);
        assert!(!records
            .get_record(&committed.target)
            .await
            .unwrap()
            .unwrap()
            .open);

        // Confirming the same pairing again returns the existing match
        let again = resolver
            .confirm_match(transaction.id, &suggestions[0], "jane")
            .await
            .unwrap();
        assert_eq!(again.id, committed.id);
        assert_eq!(again.status, MatchStatus::Confirmed);

        // Confirming a different candidate on a settled transaction fails
        let err = resolver
            .confirm_match(transaction.id, &suggestions[1], "jane")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn rejecting_returns_transaction_to_unmatched() {
        let transaction = txn(150_000, "ACME CO payment");
        let (mut resolver, transactions, _records) = seeded(
            &transaction,
            vec![
                invoice("inv-1", 150_000, "ACME invoice March"),
                invoice("inv-2", 150_000, "ACME invoice April"),
            ],
        )
        .await;

        let suggestions = match resolver.resolve(transaction.id, &[acme_rule()]).await.unwrap() {
            ResolutionResult::Suggestions(s) => s,
            other => panic!("expected suggestions, got {other:?}"),
        };
        let rejected = resolver
            .reject_match(transaction.id, &suggestions[0], "jane")
            .await
            .unwrap();
        assert_eq!(rejected.status, MatchStatus::Rejected);

        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Unmatched);
    }

    #[tokio::test]
    async fn rejected_candidate_does_not_reappear() {
        let transaction = txn(150_000, "ACME CO payment");
        let (mut resolver, _transactions, _records) = seeded(
            &transaction,
            vec![
                invoice("inv-1", 150_000, "ACME invoice March"),
                invoice("inv-2", 150_000, "ACME invoice April"),
            ],
        )
        .await;

        let mut rule = acme_rule();
        rule.action = RuleAction::RequireConfirmation;
        let rules = [rule];
        let first = match resolver.resolve(transaction.id, &rules).await.unwrap() {
            ResolutionResult::Suggestions(s) => s,
            other => panic!("expected suggestions, got {other:?}"),
        };
        assert_eq!(first.len(), 2);
        let turned_down = first[0].target.clone();
        resolver
            .reject_match(transaction.id, &first[0], "jane")
            .await
            .unwrap();

        let second = match resolver.resolve(transaction.id, &rules).await.unwrap() {
            ResolutionResult::Suggestions(s) => s,
            other => panic!("expected suggestions, got {other:?}"),
        };
        assert_eq!(second.len(), 1);
        assert!(second.iter().all(|c| c.target != turned_down));
    }

    #[tokio::test]
    async fn repeat_rejection_records_one_outcome() {
        use crate::matching::patterns::{fingerprint, pattern_key};

        let transaction = txn(89_900, "GYM MEMBERSHIP");
        let mut transactions = MemoryTransactionStore::new();
        transactions.save_transaction(&transaction).await.unwrap();
        let records = MemoryRecordService::new();
        records.insert(invoice("bill-1", 89_900, "GYM MEMBERSHIP"));

        // A moderate pattern: strong enough to suggest, never to auto-confirm
        let mut patterns = MemoryPatternStore::new();
        let fp = fingerprint(&transaction);
        let key = pattern_key(&fp);
        let now = chrono::Utc::now().naive_utc();
        patterns
            .save_pattern(&MatchingPattern {
                key: key.clone(),
                pattern_type: PatternType::Subscription,
                fingerprint: fp,
                target_type: RecordType::Invoice,
                confirmations: 3,
                rejections: 0,
                strength: 55.0,
                active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let mut resolver = MatchResolver::new(
            transactions,
            patterns.clone(),
            records,
            CoreConfig::default(),
        );
        let suggestions = match resolver.resolve(transaction.id, &[]).await.unwrap() {
            ResolutionResult::Suggestions(s) => s,
            other => panic!("expected suggestions, got {other:?}"),
        };
        assert_eq!(suggestions.len(), 1);

        let first = resolver
            .reject_match(transaction.id, &suggestions[0], "jane")
            .await
            .unwrap();
        let second = resolver
            .reject_match(transaction.id, &suggestions[0], "jane")
            .await
            .unwrap();
        assert_eq!(second.id, first.id);

        // One rejection learned, not two
        let pattern = patterns.get_pattern(&key).await.unwrap().unwrap();
        assert_eq!(pattern.rejections, 1);
        assert_eq!(pattern.strength, 35.0);
    }

    #[tokio::test]
    async fn commit_failure_voids_the_saved_match() {
        let transaction = txn(150_000, "ACME CO INV-203");
        let (mut resolver, transactions, records) =
            seeded(&transaction, vec![invoice("inv-1", 150_000, "ACME invoice")]).await;
        transactions.set_fail_updates(true);

        let err = resolver.resolve(transaction.id, &[acme_rule()]).await.unwrap_err();
        assert!(matches!(err, ReconError::Storage(_)));

        // The record was released and the persisted match voided
        let record = records
            .get_record(&RecordRef::new(RecordType::Invoice, "inv-1"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.open);
        let saved = transactions
            .list_matches_for_transaction(transaction.id)
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].status, MatchStatus::Rejected);
    }

    #[tokio::test]
    async fn split_must_sum_to_transaction_amount() {
        let transaction = txn(150_000, "combined payment");
        let (mut resolver, transactions, _records) = seeded(
            &transaction,
            vec![
                invoice("inv-1", 100_000, "first"),
                invoice("inv-2", 40_000, "second"),
            ],
        )
        .await;

        let err = resolver
            .confirm_split(
                transaction.id,
                vec![
                    SplitAllocation {
                        target: RecordRef::new(RecordType::Invoice, "inv-1"),
                        amount: 100_000,
                    },
                    SplitAllocation {
                        target: RecordRef::new(RecordType::Invoice, "inv-2"),
                        amount: 40_000,
                    },
                ],
                "jane",
            )
            .await
            .unwrap_err();
        match err {
            ReconError::SplitMismatch { expected, actual } => {
                assert_eq!(expected, 150_000);
                assert_eq!(actual, 140_000);
            }
            other => panic!("expected split mismatch, got {other:?}"),
        }

        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Unmatched);
    }

    #[tokio::test]
    async fn valid_split_applies_every_record() {
        let transaction = txn(150_000, "combined payment");
        let (mut resolver, transactions, records) = seeded(
            &transaction,
            vec![
                invoice("inv-1", 100_000, "first"),
                invoice("inv-2", 50_000, "second"),
            ],
        )
        .await;

        let split = resolver
            .confirm_split(
                transaction.id,
                vec![
                    SplitAllocation {
                        target: RecordRef::new(RecordType::Invoice, "inv-1"),
                        amount: 100_000,
                    },
                    SplitAllocation {
                        target: RecordRef::new(RecordType::Invoice, "inv-2"),
                        amount: 50_000,
                    },
                ],
                "jane",
            )
            .await
            .unwrap();
        assert!(split.is_split());
        assert_eq!(split.split_total(), 150_000);

        for id in ["inv-1", "inv-2"] {
            let record = records
                .get_record(&RecordRef::new(RecordType::Invoice, id))
                .await
                .unwrap()
                .unwrap();
            assert!(!record.open, "{id} should be applied");
        }
        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Confirmed);
    }

    #[tokio::test]
    async fn failed_record_application_rolls_back() {
        let transaction = txn(150_000, "ACME CO INV-203");
        let (mut resolver, transactions, records) =
            seeded(&transaction, vec![invoice("inv-1", 150_000, "ACME invoice")]).await;
        records.set_fail_applies(true);

        let err = resolver.resolve(transaction.id, &[acme_rule()]).await.unwrap_err();
        assert!(matches!(err, ReconError::RecordUnavailable(_) | ReconError::Storage(_)));

        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored.status, TransactionStatus::Confirmed);
        assert!(stored.match_id.is_none());
    }

    #[tokio::test]
    async fn ignore_and_restore_round_trip() {
        let transaction = txn(2_500, "bank fee");
        let (mut resolver, _transactions, _records) = seeded(&transaction, vec![]).await;

        let ignored = resolver.ignore_transaction(transaction.id).await.unwrap();
        assert_eq!(ignored.status, TransactionStatus::Ignored);

        // Ignoring twice is a no-op
        let again = resolver.ignore_transaction(transaction.id).await.unwrap();
        assert_eq!(again.status, TransactionStatus::Ignored);

        let restored = resolver.restore_transaction(transaction.id).await.unwrap();
        assert_eq!(restored.status, TransactionStatus::Unmatched);
    }

    #[tokio::test]
    async fn low_scores_are_filtered_from_suggestions() {
        let transaction = txn(150_000, "unrelated wording");
        let (mut resolver, transactions, _records) = seeded(
            &transaction,
            vec![invoice("inv-1", 240_000, "completely different")],
        )
        .await;

        let weak_rule = MatchRule::new(
            "wide amount window",
            1,
            vec![MatchCriterion::Amount(AmountCriterion::Range {
                tolerance: 100_000,
            })],
            RuleAction::RequireConfirmation,
        );
        // 100 * (1 - 90_000 / 100_001) ≈ 10, below the display floor of 40
        let result = resolver.resolve(transaction.id, &[weak_rule]).await.unwrap();
        assert_eq!(result, ResolutionResult::Suggestions(vec![]));

        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Unmatched);
    }

    #[tokio::test]
    async fn require_confirmation_action_never_auto_commits() {
        let transaction = txn(150_000, "ACME CO INV-203");
        let (mut resolver, transactions, _records) =
            seeded(&transaction, vec![invoice("inv-1", 150_000, "ACME invoice")]).await;

        let mut rule = acme_rule();
        rule.action = RuleAction::RequireConfirmation;
        let result = resolver.resolve(transaction.id, &[rule]).await.unwrap();
        match result {
            ResolutionResult::Suggestions(s) => {
                assert_eq!(s.len(), 1);
                assert_eq!(s[0].score, 100.0);
            }
            other => panic!("expected suggestions, got {other:?}"),
        }
        let stored = transactions
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Suggested);
    }
}
