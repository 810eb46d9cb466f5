//! Traits for storage abstraction and external collaborators
//!
//! The core never talks to a database or another service directly. Stores and
//! collaborator services are injected through these traits, which keeps the
//! engines testable in isolation and storage-agnostic (PostgreSQL, SQLite,
//! in-memory, remote service, ...).

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::PatternConfig;
use crate::types::*;

/// Storage for imported bank transactions and their matches
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Save a newly imported transaction
    async fn save_transaction(&mut self, transaction: &BankTransaction) -> ReconResult<()>;

    /// Get a transaction by ID
    async fn get_transaction(&self, id: Uuid) -> ReconResult<Option<BankTransaction>>;

    /// List transactions for an account, optionally bounded by posting date
    /// and filtered by status
    async fn list_transactions(
        &self,
        account_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        status: Option<TransactionStatus>,
    ) -> ReconResult<Vec<BankTransaction>>;

    /// Update a transaction (status transitions, match linkage)
    async fn update_transaction(&mut self, transaction: &BankTransaction) -> ReconResult<()>;

    /// Find a transaction by its duplicate-detection natural key
    async fn find_by_natural_key(
        &self,
        account_id: &str,
        posted_on: NaiveDate,
        amount: i64,
        reference: Option<&str>,
    ) -> ReconResult<Option<BankTransaction>>;

    /// Save a new match
    async fn save_match(&mut self, m: &TransactionMatch) -> ReconResult<()>;

    /// Get a match by ID
    async fn get_match(&self, id: Uuid) -> ReconResult<Option<TransactionMatch>>;

    /// Update a match (status transitions, decision stamps)
    async fn update_match(&mut self, m: &TransactionMatch) -> ReconResult<()>;

    /// All matches recorded against one transaction
    async fn list_matches_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> ReconResult<Vec<TransactionMatch>>;
}

/// Process-wide store of learned matching patterns
///
/// Patterns are shared mutable state across all accounts. Implementations
/// must serialize `record_outcome` per pattern key so concurrent learners
/// never lose increments; a single writer queue for all updates is an
/// acceptable coarse-grained alternative.
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Get a pattern by its fingerprint key
    async fn get_pattern(&self, key: &str) -> ReconResult<Option<MatchingPattern>>;

    /// Insert or replace a pattern
    async fn save_pattern(&mut self, pattern: &MatchingPattern) -> ReconResult<()>;

    /// All currently active patterns
    async fn list_active_patterns(&self) -> ReconResult<Vec<MatchingPattern>>;

    /// Atomically apply one confirmation/rejection outcome to the pattern
    /// with this key. Returns the updated pattern, or `None` when no pattern
    /// exists under the key.
    async fn record_outcome(
        &mut self,
        key: &str,
        outcome: MatchOutcome,
        config: &PatternConfig,
    ) -> ReconResult<Option<MatchingPattern>>;
}

/// Storage for period reconciliations
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Persist a new reconciliation, enforcing that at most one non-terminal
    /// reconciliation exists per (account, period)
    async fn begin_reconciliation(&mut self, recon: &BankReconciliation) -> ReconResult<()>;

    /// Save changes to an existing reconciliation
    async fn save_reconciliation(&mut self, recon: &BankReconciliation) -> ReconResult<()>;

    /// Get a reconciliation by ID
    async fn get_reconciliation(&self, id: Uuid) -> ReconResult<Option<BankReconciliation>>;

    /// Find a non-terminal reconciliation for an account and period, if any
    async fn find_open_reconciliation(
        &self,
        account_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> ReconResult<Option<BankReconciliation>>;
}

/// The owning services for invoices, bills, payments, transfers and journal
/// entries, seen from the matching core
///
/// Lookups may be remote; implementations are responsible for their own
/// timeouts. The resolver treats a failed candidate lookup as "no candidates
/// available" rather than failing the whole resolution.
#[async_trait]
pub trait RecordService: Send + Sync {
    /// Open records that could settle a transaction on this account around
    /// this date
    async fn find_candidates(
        &self,
        account_id: &str,
        around: NaiveDate,
        window_days: i64,
    ) -> ReconResult<Vec<LedgerRecord>>;

    /// Fetch one record by reference; `None` means it no longer exists
    async fn get_record(&self, target: &RecordRef) -> ReconResult<Option<LedgerRecord>>;

    /// Mark the record paid/cleared/applied for the matched amount.
    /// Failure here must leave the record untouched; the caller rolls the
    /// match back to suggested.
    async fn apply_match(
        &mut self,
        target: &RecordRef,
        amount: i64,
        transaction_reference: &str,
    ) -> ReconResult<()>;

    /// Undo a previously applied match on the record
    async fn release_match(
        &mut self,
        target: &RecordRef,
        transaction_reference: &str,
    ) -> ReconResult<()>;
}

/// Client sub-ledger balances for trust accounts
#[async_trait]
pub trait TrustLedgerService: Send + Sync {
    /// Summed balance of all client sub-ledgers for this account as of a date
    async fn client_ledger_total(&self, account_id: &str, as_of: NaiveDate) -> ReconResult<i64>;
}

/// Downstream general ledger, receiving reconciliation outcomes
#[async_trait]
pub trait GeneralLedgerService: Send + Sync {
    /// Post the cleared-totals summary for a completed reconciliation
    async fn post_reconciliation_summary(&mut self, recon: &BankReconciliation) -> ReconResult<()>;

    /// Emit the compliance record for a completed three-way reconciliation
    async fn record_trust_compliance(&mut self, recon: &TrustReconciliation) -> ReconResult<()>;
}
