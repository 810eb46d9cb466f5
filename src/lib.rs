//! # Reconciliation Core
//!
//! A bank reconciliation library providing transaction matching, learned
//! matching patterns, and statement-period reconciliation including three-way
//! trust account checks.
//!
//! ## Features
//!
//! - **Statement import**: Batch import with natural-key duplicate detection
//! - **Match rules**: User-authored criteria (amount, date, description, reference)
//!   evaluated deterministically with weighted scoring
//! - **Pattern learning**: Confirmed and rejected matches reinforce fingerprint
//!   patterns that auto-match recurring transactions
//! - **Match resolution**: Candidate blending, ranking, auto-confirmation,
//!   splits and the full confirm/reject lifecycle
//! - **Reconciliation**: Statement-period closing with discrepancy
//!   categorization and three-way trust reconciliation
//! - **Storage abstraction**: Database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::{CoreConfig, MatchResolver, StatementImporter};
//! use reconciliation_core::utils::{
//!     MemoryPatternStore, MemoryRecordService, MemoryTransactionStore,
//! };
//!
//! let resolver = MatchResolver::new(
//!     MemoryTransactionStore::new(),
//!     MemoryPatternStore::new(),
//!     MemoryRecordService::new(),
//!     CoreConfig::default(),
//! );
//! ```

pub mod config;
pub mod importer;
pub mod matching;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use importer::StatementImporter;
pub use matching::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
