//! In-memory implementations of every storage and collaborator trait
//!
//! Handles are cheap clones over shared state, so a test can keep one clone
//! for assertions after moving another into an engine. Also the quickest way
//! to run the whole matching pipeline in a demo or prototype without a
//! database.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::PatternConfig;
use crate::traits::{
    GeneralLedgerService, PatternStore, ReconciliationStore, RecordService, TransactionStore,
    TrustLedgerService,
};
use crate::types::*;

fn poisoned() -> ReconError {
    ReconError::Storage("poisoned lock".to_string())
}

/// In-memory [`TransactionStore`] with a failure switch for rollback testing
#[derive(Debug, Clone, Default)]
pub struct MemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<Uuid, BankTransaction>>>,
    matches: Arc<RwLock<HashMap<Uuid, TransactionMatch>>>,
    fail_updates: Arc<RwLock<bool>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update_transaction` fail
    pub fn set_fail_updates(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_updates.write() {
            *flag = fail;
        }
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn save_transaction(&mut self, transaction: &BankTransaction) -> ReconResult<()> {
        let mut map = self.transactions.write().map_err(|_| poisoned())?;
        map.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> ReconResult<Option<BankTransaction>> {
        let map = self.transactions.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        account_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        status: Option<TransactionStatus>,
    ) -> ReconResult<Vec<BankTransaction>> {
        let map = self.transactions.read().map_err(|_| poisoned())?;
        let mut out: Vec<BankTransaction> = map
            .values()
            .filter(|t| t.account_id == account_id)
            .filter(|t| start_date.map(|d| t.posted_on >= d).unwrap_or(true))
            .filter(|t| end_date.map(|d| t.posted_on <= d).unwrap_or(true))
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.posted_on.cmp(&b.posted_on).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn update_transaction(&mut self, transaction: &BankTransaction) -> ReconResult<()> {
        if *self.fail_updates.read().map_err(|_| poisoned())? {
            return Err(ReconError::Storage(
                "transaction store unavailable".to_string(),
            ));
        }
        let mut map = self.transactions.write().map_err(|_| poisoned())?;
        if !map.contains_key(&transaction.id) {
            return Err(ReconError::TransactionNotFound(transaction.id.to_string()));
        }
        map.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn find_by_natural_key(
        &self,
        account_id: &str,
        posted_on: NaiveDate,
        amount: i64,
        reference: Option<&str>,
    ) -> ReconResult<Option<BankTransaction>> {
        let map = self.transactions.read().map_err(|_| poisoned())?;
        Ok(map
            .values()
            .find(|t| {
                t.account_id == account_id
                    && t.posted_on == posted_on
                    && t.amount == amount
                    && t.reference.as_deref() == reference
            })
            .cloned())
    }

    async fn save_match(&mut self, m: &TransactionMatch) -> ReconResult<()> {
        let mut map = self.matches.write().map_err(|_| poisoned())?;
        map.insert(m.id, m.clone());
        Ok(())
    }

    async fn get_match(&self, id: Uuid) -> ReconResult<Option<TransactionMatch>> {
        let map = self.matches.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn update_match(&mut self, m: &TransactionMatch) -> ReconResult<()> {
        let mut map = self.matches.write().map_err(|_| poisoned())?;
        if !map.contains_key(&m.id) {
            return Err(ReconError::MatchNotFound(m.id.to_string()));
        }
        map.insert(m.id, m.clone());
        Ok(())
    }

    async fn list_matches_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> ReconResult<Vec<TransactionMatch>> {
        let map = self.matches.read().map_err(|_| poisoned())?;
        let mut out: Vec<TransactionMatch> = map
            .values()
            .filter(|m| m.transaction_id == transaction_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

/// In-memory [`PatternStore`]
///
/// `record_outcome` runs its read-modify-write under one write lock, which is
/// the atomicity the trait demands.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatternStore {
    patterns: Arc<RwLock<HashMap<String, MatchingPattern>>>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternStore for MemoryPatternStore {
    async fn get_pattern(&self, key: &str) -> ReconResult<Option<MatchingPattern>> {
        let map = self.patterns.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    async fn save_pattern(&mut self, pattern: &MatchingPattern) -> ReconResult<()> {
        let mut map = self.patterns.write().map_err(|_| poisoned())?;
        map.insert(pattern.key.clone(), pattern.clone());
        Ok(())
    }

    async fn list_active_patterns(&self) -> ReconResult<Vec<MatchingPattern>> {
        let map = self.patterns.read().map_err(|_| poisoned())?;
        let mut out: Vec<MatchingPattern> = map.values().filter(|p| p.active).cloned().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn record_outcome(
        &mut self,
        key: &str,
        outcome: MatchOutcome,
        config: &PatternConfig,
    ) -> ReconResult<Option<MatchingPattern>> {
        let mut map = self.patterns.write().map_err(|_| poisoned())?;
        match map.get_mut(key) {
            Some(pattern) => {
                pattern.apply_outcome(outcome, config);
                Ok(Some(pattern.clone()))
            }
            None => Ok(None),
        }
    }
}

/// In-memory [`ReconciliationStore`] enforcing per-period exclusivity
#[derive(Debug, Clone, Default)]
pub struct MemoryReconciliationStore {
    reconciliations: Arc<RwLock<HashMap<Uuid, BankReconciliation>>>,
}

impl MemoryReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconciliationStore for MemoryReconciliationStore {
    async fn begin_reconciliation(&mut self, recon: &BankReconciliation) -> ReconResult<()> {
        let mut map = self.reconciliations.write().map_err(|_| poisoned())?;
        let clash = map.values().any(|r| {
            r.account_id == recon.account_id
                && r.period_start == recon.period_start
                && r.period_end == recon.period_end
                && !r.status.is_terminal()
        });
        if clash {
            return Err(ReconError::ReconciliationInProgress(format!(
                "{} {}..{}",
                recon.account_id, recon.period_start, recon.period_end
            )));
        }
        map.insert(recon.id, recon.clone());
        Ok(())
    }

    async fn save_reconciliation(&mut self, recon: &BankReconciliation) -> ReconResult<()> {
        let mut map = self.reconciliations.write().map_err(|_| poisoned())?;
        if !map.contains_key(&recon.id) {
            return Err(ReconError::ReconciliationNotFound(recon.id.to_string()));
        }
        map.insert(recon.id, recon.clone());
        Ok(())
    }

    async fn get_reconciliation(&self, id: Uuid) -> ReconResult<Option<BankReconciliation>> {
        let map = self.reconciliations.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn find_open_reconciliation(
        &self,
        account_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> ReconResult<Option<BankReconciliation>> {
        let map = self.reconciliations.read().map_err(|_| poisoned())?;
        Ok(map
            .values()
            .find(|r| {
                r.account_id == account_id
                    && r.period_start == period_start
                    && r.period_end == period_end
                    && !r.status.is_terminal()
            })
            .cloned())
    }
}

/// In-memory [`RecordService`] with a failure switch for rollback testing
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordService {
    records: Arc<RwLock<HashMap<RecordRef, LedgerRecord>>>,
    fail_applies: Arc<RwLock<bool>>,
}

impl MemoryRecordService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one record
    pub fn insert(&self, record: LedgerRecord) {
        if let Ok(mut map) = self.records.write() {
            map.insert(record.record_ref.clone(), record);
        }
    }

    /// Make every subsequent `apply_match` fail
    pub fn set_fail_applies(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_applies.write() {
            *flag = fail;
        }
    }
}

#[async_trait]
impl RecordService for MemoryRecordService {
    async fn find_candidates(
        &self,
        _account_id: &str,
        around: NaiveDate,
        window_days: i64,
    ) -> ReconResult<Vec<LedgerRecord>> {
        let map = self.records.read().map_err(|_| poisoned())?;
        let mut out: Vec<LedgerRecord> = map
            .values()
            .filter(|r| (r.posted_on - around).num_days().abs() <= window_days)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.posted_on
                .cmp(&b.posted_on)
                .then(a.record_ref.record_id.cmp(&b.record_ref.record_id))
        });
        Ok(out)
    }

    async fn get_record(&self, target: &RecordRef) -> ReconResult<Option<LedgerRecord>> {
        let map = self.records.read().map_err(|_| poisoned())?;
        Ok(map.get(target).cloned())
    }

    async fn apply_match(
        &mut self,
        target: &RecordRef,
        _amount: i64,
        _transaction_reference: &str,
    ) -> ReconResult<()> {
        if *self.fail_applies.read().map_err(|_| poisoned())? {
            return Err(ReconError::Storage("record service unavailable".to_string()));
        }
        let mut map = self.records.write().map_err(|_| poisoned())?;
        match map.get_mut(target) {
            Some(record) if record.open => {
                record.open = false;
                Ok(())
            }
            Some(_) => Err(ReconError::RecordUnavailable(format!(
                "{:?} {} already settled",
                target.record_type, target.record_id
            ))),
            None => Err(ReconError::RecordUnavailable(format!(
                "{:?} {}",
                target.record_type, target.record_id
            ))),
        }
    }

    async fn release_match(
        &mut self,
        target: &RecordRef,
        _transaction_reference: &str,
    ) -> ReconResult<()> {
        let mut map = self.records.write().map_err(|_| poisoned())?;
        match map.get_mut(target) {
            Some(record) => {
                record.open = true;
                Ok(())
            }
            None => Err(ReconError::RecordUnavailable(format!(
                "{:?} {}",
                target.record_type, target.record_id
            ))),
        }
    }
}

/// In-memory [`TrustLedgerService`] with fixed per-account totals
#[derive(Debug, Clone, Default)]
pub struct MemoryTrustLedger {
    totals: Arc<RwLock<HashMap<String, i64>>>,
}

impl MemoryTrustLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, account_id: &str, total: i64) {
        if let Ok(mut map) = self.totals.write() {
            map.insert(account_id.to_string(), total);
        }
    }
}

#[async_trait]
impl TrustLedgerService for MemoryTrustLedger {
    async fn client_ledger_total(&self, account_id: &str, _as_of: NaiveDate) -> ReconResult<i64> {
        let map = self.totals.read().map_err(|_| poisoned())?;
        Ok(map.get(account_id).copied().unwrap_or(0))
    }
}

/// [`GeneralLedgerService`] that records what was posted to it
#[derive(Debug, Clone, Default)]
pub struct RecordingGeneralLedger {
    summaries: Arc<RwLock<Vec<BankReconciliation>>>,
    compliance: Arc<RwLock<Vec<TrustReconciliation>>>,
}

impl RecordingGeneralLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted_summaries(&self) -> usize {
        self.summaries.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn recorded_compliance(&self) -> usize {
        self.compliance.read().map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl GeneralLedgerService for RecordingGeneralLedger {
    async fn post_reconciliation_summary(&mut self, recon: &BankReconciliation) -> ReconResult<()> {
        let mut list = self.summaries.write().map_err(|_| poisoned())?;
        list.push(recon.clone());
        Ok(())
    }

    async fn record_trust_compliance(&mut self, recon: &TrustReconciliation) -> ReconResult<()> {
        let mut list = self.compliance.write().map_err(|_| poisoned())?;
        list.push(recon.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn txn(day: u32, amount: i64) -> BankTransaction {
        BankTransaction::new(
            "operating".to_string(),
            NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            Direction::Credit,
            amount,
            "seed".to_string(),
            None,
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn clones_share_state() {
        let mut store = MemoryTransactionStore::new();
        let reader = store.clone();

        let transaction = txn(1, 5_000);
        store.save_transaction(&transaction).await.unwrap();
        assert!(reader
            .get_transaction(transaction.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn list_filters_by_date_and_status() {
        let mut store = MemoryTransactionStore::new();
        store.save_transaction(&txn(1, 1_000)).await.unwrap();
        store.save_transaction(&txn(15, 2_000)).await.unwrap();
        let mut confirmed = txn(20, 3_000);
        confirmed.status = TransactionStatus::Confirmed;
        store.save_transaction(&confirmed).await.unwrap();

        let mid_month = store
            .list_transactions(
                "operating",
                Some(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(mid_month.len(), 2);

        let only_confirmed = store
            .list_transactions("operating", None, None, Some(TransactionStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(only_confirmed.len(), 1);
        assert_eq!(only_confirmed[0].id, confirmed.id);
    }

    #[tokio::test]
    async fn update_of_unknown_transaction_fails() {
        let mut store = MemoryTransactionStore::new();
        let err = store.update_transaction(&txn(1, 1_000)).await.unwrap_err();
        assert!(matches!(err, ReconError::TransactionNotFound(_)));
    }

    #[tokio::test]
    async fn record_outcome_on_missing_key_returns_none() {
        let mut store = MemoryPatternStore::new();
        let updated = store
            .record_outcome("nope", MatchOutcome::Confirmed, &PatternConfig::default())
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn apply_and_release_toggle_the_record() {
        let mut service = MemoryRecordService::new();
        let target = RecordRef::new(RecordType::Invoice, "inv-1");
        service.insert(LedgerRecord {
            record_ref: target.clone(),
            posted_on: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            amount: 1_000,
            description: "x".to_string(),
            reference: None,
            counterparty: None,
            open: true,
        });

        service.apply_match(&target, 1_000, "ref").await.unwrap();
        assert!(!service.get_record(&target).await.unwrap().unwrap().open);

        // Applying twice is an error
        let err = service.apply_match(&target, 1_000, "ref").await.unwrap_err();
        assert!(matches!(err, ReconError::RecordUnavailable(_)));

        service.release_match(&target, "ref").await.unwrap();
        assert!(service.get_record(&target).await.unwrap().unwrap().open);
    }
}
