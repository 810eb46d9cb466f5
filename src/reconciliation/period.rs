//! Statement-period reconciliation for one bank account

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ReconciliationConfig;
use crate::traits::{GeneralLedgerService, ReconciliationStore, TransactionStore};
use crate::types::*;

/// Walks a reconciliation through its lifecycle and keeps its totals honest
///
/// Cleared totals are always recomputed from the transactions themselves
/// rather than maintained incrementally, so a reconciliation can never drift
/// from the data it summarizes.
pub struct ReconciliationLedger<T, RS, G>
where
    T: TransactionStore,
    RS: ReconciliationStore,
    G: GeneralLedgerService,
{
    pub(crate) transactions: T,
    pub(crate) reconciliations: RS,
    pub(crate) general_ledger: G,
    pub(crate) config: ReconciliationConfig,
}

impl<T, RS, G> ReconciliationLedger<T, RS, G>
where
    T: TransactionStore,
    RS: ReconciliationStore,
    G: GeneralLedgerService,
{
    pub fn new(
        transactions: T,
        reconciliations: RS,
        general_ledger: G,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            transactions,
            reconciliations,
            general_ledger,
            config,
        }
    }

    /// Open a reconciliation for an account and statement period
    ///
    /// At most one non-terminal reconciliation may exist per account and
    /// period; the store rejects a second with
    /// [`ReconError::ReconciliationInProgress`].
    pub async fn start(
        &mut self,
        account_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
        opening_balance: i64,
        statement_balance: i64,
    ) -> ReconResult<BankReconciliation> {
        if period_end < period_start {
            return Err(ReconError::Validation(format!(
                "period end {period_end} precedes start {period_start}"
            )));
        }
        if let Some(open) = self
            .reconciliations
            .find_open_reconciliation(account_id, period_start, period_end)
            .await?
        {
            return Err(ReconError::ReconciliationInProgress(format!(
                "{account_id} {period_start}..{period_end} already open as {}",
                open.id
            )));
        }
        let recon = BankReconciliation::new(
            account_id.to_string(),
            period_start,
            period_end,
            opening_balance,
            statement_balance,
        );
        self.reconciliations.begin_reconciliation(&recon).await?;
        info!(account = account_id, %period_start, %period_end, "reconciliation started");
        Ok(recon)
    }

    /// Move a pending reconciliation into active work
    pub async fn begin_work(&mut self, id: Uuid) -> ReconResult<BankReconciliation> {
        let mut recon = self.require(id).await?;
        if recon.status != ReconciliationStatus::Pending {
            return Err(ReconError::InvalidTransition(format!(
                "reconciliation {id} is {:?}, expected pending",
                recon.status
            )));
        }
        recon.status = ReconciliationStatus::InProgress;
        self.reconciliations.save_reconciliation(&recon).await?;
        Ok(recon)
    }

    /// Recompute cleared totals, outstanding items and the difference from
    /// the current transaction data
    pub async fn refresh(&mut self, id: Uuid) -> ReconResult<BankReconciliation> {
        let mut recon = self.require(id).await?;
        if recon.status.is_terminal() {
            return Err(ReconError::InvalidTransition(format!(
                "reconciliation {id} is {:?}",
                recon.status
            )));
        }

        let in_period = self
            .transactions
            .list_transactions(
                &recon.account_id,
                Some(recon.period_start),
                Some(recon.period_end),
                None,
            )
            .await?;

        recon.cleared_credits = 0;
        recon.cleared_debits = 0;
        recon.outstanding_total = 0;
        recon.cleared_transaction_ids.clear();
        for transaction in &in_period {
            match transaction.status {
                TransactionStatus::Confirmed | TransactionStatus::Reconciled => {
                    if self
                        .decided_by_period_end(transaction, recon.period_end)
                        .await?
                    {
                        match transaction.direction {
                            Direction::Credit => recon.cleared_credits += transaction.amount,
                            Direction::Debit => recon.cleared_debits += transaction.amount,
                        }
                        recon.cleared_transaction_ids.push(transaction.id);
                    } else {
                        recon.outstanding_total += transaction.signed_amount();
                    }
                }
                TransactionStatus::Unmatched | TransactionStatus::Suggested => {
                    recon.outstanding_total += transaction.signed_amount();
                }
                TransactionStatus::Ignored => {}
            }
        }
        recon.difference = recon.statement_balance - recon.book_balance();
        self.reconciliations.save_reconciliation(&recon).await?;
        Ok(recon)
    }

    /// A matched transaction clears in this period only when its match was
    /// decided by the period end; a later decision leaves it outstanding
    async fn decided_by_period_end(
        &self,
        transaction: &BankTransaction,
        period_end: NaiveDate,
    ) -> ReconResult<bool> {
        let match_id = match transaction.match_id {
            Some(id) => id,
            // Status set without a linked match (manual adjustment)
            None => return Ok(true),
        };
        let decided = match self.transactions.get_match(match_id).await? {
            Some(m) => m.decided_at,
            None => None,
        };
        Ok(decided.map(|at| at.date() <= period_end).unwrap_or(true))
    }

    /// Attempt to close the reconciliation
    ///
    /// Only reachable once work has begun; completing a pending
    /// reconciliation is an invalid transition. Balances within the rounding
    /// tolerance complete the period: cleared
    /// transactions become immutable and the summary is posted downstream.
    /// Otherwise the reconciliation lands in the exception state with the
    /// gap recorded, categorized as a timing gap when the outstanding items
    /// explain it exactly. Either way this returns `Ok`; the caller reads the
    /// status.
    pub async fn complete(&mut self, id: Uuid) -> ReconResult<BankReconciliation> {
        let current = self.require(id).await?;
        if current.status == ReconciliationStatus::Pending {
            return Err(ReconError::InvalidTransition(format!(
                "reconciliation {id} is pending; begin work before completing"
            )));
        }
        let mut recon = self.refresh(id).await?;

        if recon.difference.abs() <= self.config.rounding_tolerance {
            recon.status = ReconciliationStatus::Completed;
            recon.completed_at = Some(Utc::now().naive_utc());
            recon.discrepancies.clear();
            for transaction_id in recon.cleared_transaction_ids.clone() {
                let mut transaction = self
                    .transactions
                    .get_transaction(transaction_id)
                    .await?
                    .ok_or_else(|| {
                        ReconError::TransactionNotFound(transaction_id.to_string())
                    })?;
                transaction.status = TransactionStatus::Reconciled;
                transaction.updated_at = Utc::now().naive_utc();
                self.transactions.update_transaction(&transaction).await?;
            }
            self.reconciliations.save_reconciliation(&recon).await?;
            self.general_ledger
                .post_reconciliation_summary(&recon)
                .await?;
            info!(
                account = %recon.account_id,
                cleared = recon.cleared_transaction_ids.len(),
                "reconciliation completed"
            );
        } else {
            let category = if recon.outstanding_total == recon.difference {
                DiscrepancyCategory::Timing
            } else {
                DiscrepancyCategory::Unknown
            };
            recon.discrepancies = vec![Discrepancy {
                amount: recon.difference,
                category,
                note: format!(
                    "statement balance {} vs book balance {}",
                    recon.statement_balance,
                    recon.book_balance()
                ),
            }];
            recon.status = ReconciliationStatus::Exception;
            self.reconciliations.save_reconciliation(&recon).await?;
            warn!(
                account = %recon.account_id,
                difference = recon.difference,
                ?category,
                "reconciliation does not balance"
            );
        }
        Ok(recon)
    }

    /// Abandon a reconciliation that has not completed
    pub async fn cancel(&mut self, id: Uuid) -> ReconResult<BankReconciliation> {
        let mut recon = self.require(id).await?;
        if recon.status.is_terminal() {
            return Err(ReconError::InvalidTransition(format!(
                "reconciliation {id} is {:?}",
                recon.status
            )));
        }
        recon.status = ReconciliationStatus::Cancelled;
        self.reconciliations.save_reconciliation(&recon).await?;
        Ok(recon)
    }

    /// Reopen a completed reconciliation for correction
    ///
    /// Its reconciled transactions drop back to confirmed so they can be
    /// unmatched or re-cleared, and the reconciliation returns to in-progress.
    pub async fn reopen(&mut self, id: Uuid, reopened_by: &str) -> ReconResult<BankReconciliation> {
        let mut recon = self.require(id).await?;
        if recon.status != ReconciliationStatus::Completed {
            return Err(ReconError::InvalidTransition(format!(
                "reconciliation {id} is {:?}, only completed ones reopen",
                recon.status
            )));
        }
        for transaction_id in recon.cleared_transaction_ids.clone() {
            if let Some(mut transaction) =
                self.transactions.get_transaction(transaction_id).await?
            {
                if transaction.status == TransactionStatus::Reconciled {
                    transaction.status = TransactionStatus::Confirmed;
                    transaction.updated_at = Utc::now().naive_utc();
                    self.transactions.update_transaction(&transaction).await?;
                }
            }
        }
        recon.status = ReconciliationStatus::InProgress;
        recon.completed_at = None;
        self.reconciliations.save_reconciliation(&recon).await?;
        info!(account = %recon.account_id, by = reopened_by, "reconciliation reopened");
        Ok(recon)
    }

    pub(crate) async fn require(&self, id: Uuid) -> ReconResult<BankReconciliation> {
        self.reconciliations
            .get_reconciliation(id)
            .await?
            .ok_or_else(|| ReconError::ReconciliationNotFound(id.to_string()))
    }
}
