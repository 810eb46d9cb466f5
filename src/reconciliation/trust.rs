//! Three-way reconciliation for trust and client-fund accounts
//!
//! An ordinary reconciliation proves bank and book agree. Trust accounts add
//! a third leg: the summed client sub-ledgers must equal both. A bank balance
//! below what the client ledgers say is held is treated as suspected
//! misappropriation until someone proves otherwise.

use tracing::{info, warn};
use uuid::Uuid;

use crate::reconciliation::period::ReconciliationLedger;
use crate::traits::{
    GeneralLedgerService, ReconciliationStore, TransactionStore, TrustLedgerService,
};
use crate::types::*;

pub struct TrustReconciliationLedger<T, RS, G, C>
where
    T: TransactionStore,
    RS: ReconciliationStore,
    G: GeneralLedgerService,
    C: TrustLedgerService,
{
    inner: ReconciliationLedger<T, RS, G>,
    client_ledgers: C,
}

impl<T, RS, G, C> TrustReconciliationLedger<T, RS, G, C>
where
    T: TransactionStore,
    RS: ReconciliationStore,
    G: GeneralLedgerService,
    C: TrustLedgerService,
{
    pub fn new(inner: ReconciliationLedger<T, RS, G>, client_ledgers: C) -> Self {
        Self {
            inner,
            client_ledgers,
        }
    }

    /// The two-way ledger, for starting, refreshing and reopening
    pub fn ledger(&mut self) -> &mut ReconciliationLedger<T, RS, G> {
        &mut self.inner
    }

    /// Current three-way picture without attempting completion
    pub async fn snapshot(&mut self, id: Uuid) -> ReconResult<TrustReconciliation> {
        let reconciliation = self.inner.refresh(id).await?;
        let client_ledger_total = self
            .client_ledgers
            .client_ledger_total(&reconciliation.account_id, reconciliation.period_end)
            .await?;
        Ok(TrustReconciliation {
            reconciliation,
            client_ledger_total,
        })
    }

    /// Attempt to close a trust reconciliation
    ///
    /// Completion requires all three balances to agree within the rounding
    /// tolerance. A client-ledger gap puts the reconciliation in exception:
    /// client ledgers above the book balance mean client money is missing
    /// from the account and the gap is flagged as suspected fraud, the
    /// opposite direction as a bookkeeping error. Only a fully agreed
    /// completion emits the downstream compliance record.
    pub async fn complete(&mut self, id: Uuid) -> ReconResult<TrustReconciliation> {
        let refreshed = self.inner.refresh(id).await?;
        if refreshed.status == ReconciliationStatus::Pending {
            return Err(ReconError::InvalidTransition(format!(
                "trust reconciliation {id} is pending; begin work before completing"
            )));
        }
        let client_ledger_total = self
            .client_ledgers
            .client_ledger_total(&refreshed.account_id, refreshed.period_end)
            .await?;

        let client_gap = client_ledger_total - refreshed.book_balance();
        if client_gap.abs() > self.inner.config.rounding_tolerance {
            let category = if client_gap > 0 {
                DiscrepancyCategory::FraudSuspect
            } else {
                DiscrepancyCategory::Error
            };
            let mut reconciliation = refreshed;
            reconciliation.discrepancies = vec![Discrepancy {
                amount: client_gap,
                category,
                note: format!(
                    "client ledgers total {} vs book balance {}",
                    client_ledger_total,
                    reconciliation.book_balance()
                ),
            }];
            reconciliation.status = ReconciliationStatus::Exception;
            self.inner
                .reconciliations
                .save_reconciliation(&reconciliation)
                .await?;
            warn!(
                account = %reconciliation.account_id,
                gap = client_gap,
                ?category,
                "trust reconciliation does not balance against client ledgers"
            );
            return Ok(TrustReconciliation {
                reconciliation,
                client_ledger_total,
            });
        }

        let reconciliation = self.inner.complete(id).await?;
        let trust = TrustReconciliation {
            reconciliation,
            client_ledger_total,
        };
        if trust.reconciliation.status == ReconciliationStatus::Completed {
            self.inner
                .general_ledger
                .record_trust_compliance(&trust)
                .await?;
            info!(
                account = %trust.reconciliation.account_id,
                "trust reconciliation completed three ways"
            );
        }
        Ok(trust)
    }
}
