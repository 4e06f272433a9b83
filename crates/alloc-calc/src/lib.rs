//! # Allocation Calculation Engine
//!
//! 批次需求追蹤、優先序分配模擬與生產耗用

pub mod bom;
pub mod catalog;
pub mod consumption;
pub mod requirement;
pub mod simulator;

// Re-export 主要類型
pub use bom::{BomResolver, StaticBomResolver};
pub use catalog::{BatchCatalog, InMemoryBatchCatalog};
pub use consumption::{ConsumedLine, ConsumptionRecorder, ConsumptionReport, UnitCompletion};
pub use requirement::RequirementTracker;
pub use simulator::PriorityAllocationSimulator;

use alloc_core::BatchId;
use serde::{Deserialize, Serialize};

/// 軟性警告（不影響操作成功）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocWarning {
    pub sku: String,
    pub batch_id: Option<BatchId>,
    pub kind: WarningKind,
    pub message: String,
    pub severity: WarningSeverity,
}

impl AllocWarning {
    pub fn new(sku: String, kind: WarningKind, message: String, severity: WarningSeverity) -> Self {
        Self {
            sku,
            batch_id: None,
            kind,
            message,
            severity,
        }
    }

    pub fn info(sku: String, kind: WarningKind, message: String) -> Self {
        Self::new(sku, kind, message, WarningSeverity::Info)
    }

    pub fn warning(sku: String, kind: WarningKind, message: String) -> Self {
        Self::new(sku, kind, message, WarningSeverity::Warning)
    }

    pub fn error(sku: String, kind: WarningKind, message: String) -> Self {
        Self::new(sku, kind, message, WarningSeverity::Error)
    }

    /// 建構器模式：設置批次
    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}

/// 警告種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// 可耗用庫存不足，只做了部分扣除
    UnderSupply,
    /// 耗用量超過剩餘需求
    OverConsumption,
    /// 耗用的物料不在批次需求內
    UntrackedComponent,
    /// 分帳已扣除但投影同步失敗
    SyncDeferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningSeverity {
    Info,
    Warning,
    Error,
}
