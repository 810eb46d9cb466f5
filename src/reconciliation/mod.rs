//! Statement-period reconciliation, including three-way trust accounts

pub mod period;
pub mod trust;

pub use period::ReconciliationLedger;
pub use trust::TrustReconciliationLedger;
