//! Utility implementations of the storage and collaborator traits

pub mod memory_storage;

pub use memory_storage::{
    MemoryPatternStore, MemoryReconciliationStore, MemoryRecordService, MemoryTransactionStore,
    MemoryTrustLedger, RecordingGeneralLedger,
};
