//! # Allocation Ledger
//!
//! 分帳（權威資料）與庫存投影（推導快取）的雙層儲存

pub mod dirty_tracking;
pub mod ledger;
pub mod projection;
pub mod reconcile;
pub mod sync;

// Re-export 主要類型
pub use dirty_tracking::DirtyTracker;
pub use ledger::{AllocationLedger, Consumed, ReleaseOutcome};
pub use projection::{InMemoryProjectionStore, ProjectionStore, ProjectionView};
pub use reconcile::{ProjectionMismatch, ReconciliationReport};
pub use sync::Synchronizer;
