//! Statement import with duplicate detection
//!
//! Banks re-deliver overlapping statement windows, so the same line can
//! arrive in several batches. A line is identified by its natural key
//! (account, posting date, amount, reference) and silently skipped when it
//! has been seen before, within the batch or in any earlier one.

use std::collections::HashSet;

use tracing::info;
use uuid::Uuid;

use crate::traits::TransactionStore;
use crate::types::*;

pub struct StatementImporter<S: TransactionStore> {
    store: S,
}

impl<S: TransactionStore> StatementImporter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Import one batch of normalized statement lines
    ///
    /// The batch is validated up front; a malformed line fails the whole
    /// import before anything is written. Duplicates are counted, not errors.
    pub async fn import(&mut self, lines: &[ImportedLine]) -> ReconResult<ImportSummary> {
        for (index, line) in lines.iter().enumerate() {
            if line.amount <= 0 {
                return Err(ReconError::Validation(format!(
                    "line {index}: amount must be positive, got {}",
                    line.amount
                )));
            }
            if line.account_id.is_empty() {
                return Err(ReconError::Validation(format!(
                    "line {index}: missing account"
                )));
            }
            if line.description.trim().is_empty() {
                return Err(ReconError::Validation(format!(
                    "line {index}: missing description"
                )));
            }
        }

        let batch_id = Uuid::new_v4();
        let mut seen = HashSet::new();
        let mut imported = 0;
        let mut duplicates = 0;

        for line in lines {
            // Same natural key the store checks, so both passes agree
            let key = (
                line.account_id.clone(),
                line.posted_on,
                line.amount,
                line.reference.clone(),
            );
            if !seen.insert(key) {
                duplicates += 1;
                continue;
            }
            let existing = self
                .store
                .find_by_natural_key(
                    &line.account_id,
                    line.posted_on,
                    line.amount,
                    line.reference.as_deref(),
                )
                .await?;
            if existing.is_some() {
                duplicates += 1;
                continue;
            }

            let transaction = BankTransaction::new(
                line.account_id.clone(),
                line.posted_on,
                line.direction,
                line.amount,
                line.description.clone(),
                line.reference.clone(),
                batch_id,
            );
            self.store.save_transaction(&transaction).await?;
            imported += 1;
        }

        info!(batch = %batch_id, imported, duplicates, "statement batch imported");
        Ok(ImportSummary {
            batch_id,
            imported,
            duplicates,
        })
    }
}
