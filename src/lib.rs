//! 批次庫存分配引擎
//!
//! 兩層模型：
//! - 分帳（權威）：每個 (物料, 儲位) 上各批次的分配數量
//! - 投影（衍生）：每個 (物料, 儲位) 的總量，由分帳單向同步
//!
//! 健康檢查依批次優先序在投影快照上模擬分配，完工時依物料清單扣除分帳。

pub mod engine;
pub mod logging;

pub use engine::{AllocationEngine, DeletionReport};
pub use logging::{init_test_tracing, init_tracing, LoggingError};

pub use alloc_calc::{
    AllocWarning, BatchCatalog, BomResolver, ConsumedLine, ConsumptionReport,
    InMemoryBatchCatalog, StaticBomResolver, UnitCompletion, WarningKind, WarningSeverity,
};
pub use alloc_core::{
    AllocError, Batch, BatchId, BatchStatus, ComponentLine, ConsumptionSource, DeletionPolicy,
    EngineConfig, HealthReport, HealthStatus, LedgerEntry, LocationOrder, LossReason,
    MovementKind, MutationMeta, ProjectionEntry, Requirement, Result, Shortage, StockKey,
    StockMovement, SyncRetryPolicy, UNASSIGNED,
};
pub use alloc_ledger::{
    InMemoryProjectionStore, ProjectionMismatch, ProjectionStore, ReconciliationReport,
};
