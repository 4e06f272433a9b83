//! # Allocation Core
//!
//! 批次庫存分配的核心資料模型與類型定義

pub mod batch;
pub mod config;
pub mod health;
pub mod inventory;
pub mod movement;
pub mod requirement;

// Re-export 主要類型
pub use batch::{Batch, BatchId, BatchStatus, ComponentLine, UNASSIGNED};
pub use config::{ConsumptionSource, DeletionPolicy, EngineConfig, LocationOrder, SyncRetryPolicy};
pub use health::{HealthReport, HealthStatus, Shortage};
pub use inventory::{LedgerEntry, ProjectionEntry, StockKey};
pub use movement::{LossReason, MovementKind, MutationMeta, StockMovement};
pub use requirement::Requirement;

use rust_decimal::Decimal;

/// 分配引擎錯誤類型
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("無效的數量: {0}（必須大於 0）")]
    InvalidQuantity(Decimal),

    #[error("分配不足: {key} 批次 {batch_id} 要求 {requested}，現有 {available}")]
    InsufficientAllocation {
        key: StockKey,
        batch_id: BatchId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("投影同步失敗: {key} 重試 {attempts} 次後仍失敗（{reason}），分帳已提交但投影已過期")]
    SyncFailure {
        key: StockKey,
        attempts: u32,
        reason: String,
    },

    #[error("找不到批次: {0}")]
    BatchNotFound(BatchId),

    #[error("找不到需求: 批次 {batch_id} 物料 {sku}")]
    RequirementNotFound { batch_id: BatchId, sku: String },

    #[error("找不到分帳記錄: {0}")]
    LedgerNotFound(StockKey),

    #[error("批次 {0} 已啟用，重新啟用前必須先重置需求")]
    AlreadyActivated(BatchId),

    #[error("批次 {batch_id} 狀態為 {status:?}，無法執行 {operation}")]
    InvalidBatchState {
        batch_id: BatchId,
        status: BatchStatus,
        operation: &'static str,
    },

    #[error("批次 {batch_id} 只剩 {units_left} 單位，無法完工 {requested} 單位")]
    ExceedsUnitsLeft {
        batch_id: BatchId,
        requested: u32,
        units_left: u32,
    },

    #[error("找不到物料清單: 區域 {zone} 產品 {product_type}")]
    BomNotFound { zone: String, product_type: String },

    #[error("儲存錯誤: {0}")]
    Store(String),

    #[error("配置錯誤: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AllocError>;

/// 驗證數量必須為正數
pub fn ensure_positive(quantity: Decimal) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(AllocError::InvalidQuantity(quantity));
    }
    Ok(())
}
