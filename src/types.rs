//! Core types and data structures for the reconciliation system

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a bank statement line relative to the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Money into the account
    Credit,
    /// Money out of the account
    Debit,
}

/// Lifecycle state of an imported bank transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Imported, no match decided yet
    Unmatched,
    /// One or more candidate matches await review
    Suggested,
    /// A match has been confirmed (manually or automatically)
    Confirmed,
    /// Included in a completed reconciliation; immutable until reopened
    Reconciled,
    /// Excluded from matching and reconciliation by an operator
    Ignored,
}

/// One imported bank statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    /// Unique identifier for the transaction
    pub id: Uuid,
    /// Bank account this line belongs to
    pub account_id: String,
    /// Date the bank posted the line
    pub posted_on: NaiveDate,
    /// Credit or debit relative to the account
    pub direction: Direction,
    /// Amount in minor units, always non-negative
    pub amount: i64,
    /// Statement description text
    pub description: String,
    /// Counterparty or bank reference, when the statement carries one
    pub reference: Option<String>,
    /// Import batch this line arrived in
    pub import_batch_id: Uuid,
    /// Current lifecycle state
    pub status: TransactionStatus,
    /// Confirmed match, when one exists
    pub match_id: Option<Uuid>,
    /// When the transaction was created
    pub created_at: NaiveDateTime,
    /// When the transaction was last updated
    pub updated_at: NaiveDateTime,
}

impl BankTransaction {
    /// Create a new unmatched transaction from imported statement data
    pub fn new(
        account_id: String,
        posted_on: NaiveDate,
        direction: Direction,
        amount: i64,
        description: String,
        reference: Option<String>,
        import_batch_id: Uuid,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            account_id,
            posted_on,
            direction,
            amount,
            description,
            reference,
            import_batch_id,
            status: TransactionStatus::Unmatched,
            match_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount signed from the account's perspective (credits positive)
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }

    /// Whether the transaction may still enter matching
    pub fn is_open_for_matching(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Unmatched | TransactionStatus::Suggested
        )
    }
}

/// Normalized statement line delivered by the import feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedLine {
    pub account_id: String,
    pub posted_on: NaiveDate,
    pub direction: Direction,
    pub amount: i64,
    pub description: String,
    pub reference: Option<String>,
}

/// Outcome of importing one batch of statement lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: Uuid,
    pub imported: usize,
    pub duplicates: usize,
}

/// Kinds of accounting records a transaction can pair with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Invoice,
    Bill,
    Payment,
    Transfer,
    JournalEntry,
}

/// Weak reference to an accounting record owned by another service
///
/// This is a lookup key, never an owning handle; the record's lifecycle is
/// independent of any match that points at it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_type: RecordType,
    pub record_id: String,
}

impl RecordRef {
    pub fn new(record_type: RecordType, record_id: impl Into<String>) -> Self {
        Self {
            record_type,
            record_id: record_id.into(),
        }
    }
}

/// Snapshot of a candidate accounting record fetched from its owning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub record_ref: RecordRef,
    pub posted_on: NaiveDate,
    /// Amount in minor units, always non-negative
    pub amount: i64,
    pub description: String,
    pub reference: Option<String>,
    pub counterparty: Option<String>,
    /// Whether the record is still open for settlement
    pub open: bool,
}

/// Confidence tier derived from a candidate's score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
    Exact,
}

impl ConfidenceTier {
    /// Derive the tier from a score in [0, 100]
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            ConfidenceTier::Exact
        } else if score >= 80.0 {
            ConfidenceTier::High
        } else if score >= 55.0 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Where a candidate match came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchSource {
    Rule,
    Pattern,
    Manual,
    ReferenceEquality,
}

/// What a rule does when it matches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleAction {
    /// Commit the match without review when it is the unique survivor
    AutoMatch,
    /// As auto-match, and flag the transaction as reconcile-eligible
    AutoReconcile,
    /// Always queue for human confirmation
    RequireConfirmation,
    /// Suggest with a category tag attached
    Tag(String),
}

/// A scored pairing of one transaction to one accounting record
///
/// Transient during resolution; only the chosen candidate's score, source and
/// reasons survive into the persisted [`TransactionMatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub target: RecordRef,
    /// Posting date of the target record, used for tie-breaking
    pub record_date: NaiveDate,
    /// Score in [0, 100]
    pub score: f64,
    pub tier: ConfidenceTier,
    pub source: MatchSource,
    /// Action requested by the producing rule, when rule-sourced
    pub action: Option<RuleAction>,
    /// Human-readable factors that contributed to the score
    pub reasons: Vec<String>,
}

impl CandidateMatch {
    pub fn new(
        target: RecordRef,
        record_date: NaiveDate,
        score: f64,
        source: MatchSource,
        reasons: Vec<String>,
    ) -> Self {
        let score = score.clamp(0.0, 100.0);
        Self {
            target,
            record_date,
            score,
            tier: ConfidenceTier::from_score(score),
            source,
            action: None,
            reasons,
        }
    }
}

/// Review state of a committed or pending match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    Suggested,
    Confirmed,
    Rejected,
    AutoConfirmed,
}

impl MatchStatus {
    /// Whether this status counts as a confirmed pairing
    pub fn is_confirmed(&self) -> bool {
        matches!(self, MatchStatus::Confirmed | MatchStatus::AutoConfirmed)
    }
}

/// One allocation within a split match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitAllocation {
    pub target: RecordRef,
    /// Amount in minor units allocated to this record
    pub amount: i64,
}

/// The committed or pending pairing of a transaction to accounting records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMatch {
    pub id: Uuid,
    pub transaction_id: Uuid,
    /// Primary target record
    pub target: RecordRef,
    pub score: f64,
    pub source: MatchSource,
    pub reasons: Vec<String>,
    pub status: MatchStatus,
    /// Partial allocations for split matches; empty for simple matches
    pub splits: Vec<SplitAllocation>,
    /// Actor who confirmed or rejected the match
    pub decided_by: Option<String>,
    pub decided_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl TransactionMatch {
    pub fn new(
        transaction_id: Uuid,
        target: RecordRef,
        score: f64,
        source: MatchSource,
        reasons: Vec<String>,
        status: MatchStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            target,
            score,
            source,
            reasons,
            status,
            splits: Vec::new(),
            decided_by: None,
            decided_at: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Whether this match carries a split allocation
    pub fn is_split(&self) -> bool {
        !self.splits.is_empty()
    }

    /// Sum of split allocation amounts
    pub fn split_total(&self) -> i64 {
        self.splits.iter().map(|s| s.amount).sum()
    }
}

/// Outcome fed back to the pattern learner after a human or automatic decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Confirmed,
    Rejected,
}

/// Classification of a learned matching pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternType {
    VendorAmount,
    Recurring,
    Salary,
    Subscription,
    Utility,
    Tax,
    Other,
}

/// Feature set distilled from a transaction for pattern matching
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Description with numeric and date tokens stripped, case-normalized
    pub template: String,
    /// Decimal order of magnitude of the amount (digit count)
    pub magnitude: u32,
    /// Day of month the transaction posted (periodicity feature)
    pub day_of_month: u32,
    /// ISO weekday number, Monday = 1 (periodicity feature)
    pub weekday: u32,
}

impl Fingerprint {
    /// Decimal digit count used for amount bucketing
    pub fn magnitude_of(amount: i64) -> u32 {
        (amount.unsigned_abs().max(1)).ilog10() + 1
    }
}

/// A reusable matching fingerprint distilled from confirmed matches
///
/// Patterns are process-wide shared state. They are updated in place on every
/// confirmation or rejection that matches their fingerprint, and deactivated
/// rather than deleted so the audit history survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingPattern {
    /// Deterministic hash of the identity features of the fingerprint
    pub key: String,
    pub pattern_type: PatternType,
    pub fingerprint: Fingerprint,
    /// Kind of record this pattern has historically paired with
    pub target_type: RecordType,
    pub confirmations: u32,
    pub rejections: u32,
    /// Bounded, reinforcement-adjusted confidence for this fingerprint
    pub strength: f64,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl MatchingPattern {
    /// Derived success rate over all recorded outcomes
    pub fn success_rate(&self) -> f64 {
        let total = self.confirmations + self.rejections;
        if total == 0 {
            0.0
        } else {
            f64::from(self.confirmations) / f64::from(total)
        }
    }

    /// Apply one decision outcome in place, adjusting counters and bounded
    /// strength. A pattern falling below the deactivation floor is switched
    /// inactive rather than deleted.
    pub fn apply_outcome(&mut self, outcome: MatchOutcome, config: &crate::config::PatternConfig) {
        match outcome {
            MatchOutcome::Confirmed => {
                self.confirmations += 1;
                self.strength =
                    (self.strength + config.strength_increment).min(config.max_strength);
            }
            MatchOutcome::Rejected => {
                self.rejections += 1;
                self.strength = (self.strength - config.strength_decrement).max(0.0);
                if self.strength < config.deactivation_floor {
                    self.active = false;
                }
            }
        }
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Category assigned to a recorded reconciliation discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    /// Explained by items outstanding across the period boundary
    Timing,
    /// A bookkeeping or bank error
    Error,
    /// Requires investigation as possible misappropriation
    FraudSuspect,
    Unknown,
}

/// A recorded gap discovered during reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Signed gap in minor units
    pub amount: i64,
    pub category: DiscrepancyCategory,
    pub note: String,
}

/// State of a statement-period reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconciliationStatus {
    Pending,
    InProgress,
    Completed,
    /// Blocked on an unresolved discrepancy
    Exception,
    Cancelled,
}

impl ReconciliationStatus {
    /// Whether no further work can happen without an explicit reopen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconciliationStatus::Completed | ReconciliationStatus::Cancelled
        )
    }
}

/// A completed-or-in-progress statement-period closing for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankReconciliation {
    pub id: Uuid,
    pub account_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Book balance at the start of the period, minor units
    pub opening_balance: i64,
    /// Closing balance reported by the bank statement, minor units
    pub statement_balance: i64,
    /// Sum of cleared credit amounts
    pub cleared_credits: i64,
    /// Sum of cleared debit amounts
    pub cleared_debits: i64,
    /// Signed sum of transactions not yet cleared for this period
    pub outstanding_total: i64,
    /// statement_balance - (opening_balance + cleared_credits - cleared_debits)
    pub difference: i64,
    pub status: ReconciliationStatus,
    /// Transactions treated as cleared in this reconciliation
    pub cleared_transaction_ids: Vec<Uuid>,
    pub discrepancies: Vec<Discrepancy>,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

impl BankReconciliation {
    pub fn new(
        account_id: String,
        period_start: NaiveDate,
        period_end: NaiveDate,
        opening_balance: i64,
        statement_balance: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            period_start,
            period_end,
            opening_balance,
            statement_balance,
            cleared_credits: 0,
            cleared_debits: 0,
            outstanding_total: 0,
            difference: 0,
            status: ReconciliationStatus::Pending,
            cleared_transaction_ids: Vec::new(),
            discrepancies: Vec::new(),
            started_at: chrono::Utc::now().naive_utc(),
            completed_at: None,
        }
    }

    /// Book balance implied by the cleared items
    pub fn book_balance(&self) -> i64 {
        self.opening_balance + self.cleared_credits - self.cleared_debits
    }
}

/// Three-way reconciliation for a trust or client-fund account
///
/// Carries the aggregated client sub-ledger balance alongside the ordinary
/// reconciliation; completion requires bank, book and client-ledger balances
/// to agree. This is a compliance-mandated invariant, not a convenience check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustReconciliation {
    pub reconciliation: BankReconciliation,
    /// Summed client sub-ledger balances as of the period end, minor units
    pub client_ledger_total: i64,
}

impl TrustReconciliation {
    /// Whether bank, book and client-ledger balances all agree within tolerance
    pub fn balances_agree(&self, tolerance: i64) -> bool {
        let bank = self.reconciliation.statement_balance;
        let book = self.reconciliation.book_balance();
        let client = self.client_ledger_total;
        (bank - book).abs() <= tolerance && (book - client).abs() <= tolerance
    }
}

/// Errors that can occur in the reconciliation core
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Match not found: {0}")]
    MatchNotFound(String),
    #[error("Reconciliation not found: {0}")]
    ReconciliationNotFound(String),
    #[error("Accounting record unavailable: {0}")]
    RecordUnavailable(String),
    #[error("Inconsistent state between match and accounting record: {0}")]
    RecordInconsistency(String),
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("Reconciliation already in progress for {0}")]
    ReconciliationInProgress(String),
    #[error("Split allocations sum to {actual} but transaction amount is {expected}")]
    SplitMismatch { expected: i64, actual: i64 },
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;

/// Periodicity features (day of month, ISO weekday) of a posting date
pub(crate) fn date_features(date: NaiveDate) -> (u32, u32) {
    (date.day(), date.weekday().number_from_monday())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_amount_follows_direction() {
        let batch = Uuid::new_v4();
        let credit = BankTransaction::new(
            "acct".to_string(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            Direction::Credit,
            150_000,
            "DEPOSIT".to_string(),
            None,
            batch,
        );
        let mut debit = credit.clone();
        debit.direction = Direction::Debit;

        assert_eq!(credit.signed_amount(), 150_000);
        assert_eq!(debit.signed_amount(), -150_000);
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(ConfidenceTier::from_score(100.0), ConfidenceTier::Exact);
        assert_eq!(ConfidenceTier::from_score(95.0), ConfidenceTier::Exact);
        assert_eq!(ConfidenceTier::from_score(94.9), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(80.0), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(55.0), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(10.0), ConfidenceTier::Low);
    }

    #[test]
    fn magnitude_buckets_by_digit_count() {
        assert_eq!(Fingerprint::magnitude_of(0), 1);
        assert_eq!(Fingerprint::magnitude_of(9), 1);
        assert_eq!(Fingerprint::magnitude_of(10), 2);
        assert_eq!(Fingerprint::magnitude_of(150_000), 6);
        assert_eq!(Fingerprint::magnitude_of(999_999), 6);
        assert_eq!(Fingerprint::magnitude_of(1_000_000), 7);
    }

    #[test]
    fn success_rate_handles_zero_outcomes() {
        let now = chrono::Utc::now().naive_utc();
        let mut pattern = MatchingPattern {
            key: "k".to_string(),
            pattern_type: PatternType::VendorAmount,
            fingerprint: Fingerprint {
                template: "acme".to_string(),
                magnitude: 6,
                day_of_month: 1,
                weekday: 1,
            },
            target_type: RecordType::Invoice,
            confirmations: 0,
            rejections: 0,
            strength: 0.0,
            active: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(pattern.success_rate(), 0.0);

        pattern.confirmations = 3;
        pattern.rejections = 1;
        assert_eq!(pattern.success_rate(), 0.75);
    }

    #[test]
    fn book_balance_from_cleared_totals() {
        let mut recon = BankReconciliation::new(
            "trust".to_string(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            1_000_000,
            1_150_000,
        );
        recon.cleared_credits = 200_000;
        recon.cleared_debits = 50_000;
        assert_eq!(recon.book_balance(), 1_150_000);
    }

    #[test]
    fn trust_balances_agree_within_tolerance() {
        let mut recon = BankReconciliation::new(
            "trust".to_string(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            5_000_000,
            5_000_000,
        );
        recon.cleared_credits = 0;
        recon.cleared_debits = 0;

        let agree = TrustReconciliation {
            reconciliation: recon.clone(),
            client_ledger_total: 5_000_000,
        };
        assert!(agree.balances_agree(0));

        let short = TrustReconciliation {
            reconciliation: recon,
            client_ledger_total: 4_980_000,
        };
        assert!(!short.balances_agree(0));
    }
}
