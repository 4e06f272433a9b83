//! 庫存異動稽核記錄

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BatchId, StockKey};

/// 損耗原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossReason {
    /// 報廢
    Waste,
    /// 遺失
    Loss,
    /// 不良品
    Defect,
}

/// 異動類型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    /// 收貨
    Receipt,
    /// 分配
    Allocation,
    /// 釋放
    Deallocation,
    /// 儲位調撥
    Transfer,
    /// 批次間轉撥
    Reassignment,
    /// 損耗
    Loss(LossReason),
    /// 生產耗用
    Consumption,
    /// 批次刪除釋放
    BatchRelease,
}

/// 異動操作者與時間
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationMeta {
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl MutationMeta {
    pub fn new(actor: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            at,
        }
    }

    /// 以目前時間建立
    pub fn now(actor: impl Into<String>) -> Self {
        Self::new(actor, Utc::now())
    }
}

/// 庫存異動記錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub kind: MovementKind,
    pub key: StockKey,

    /// 調撥目的儲位
    pub to_location: Option<String>,

    pub batch_id: BatchId,

    /// 轉撥目的批次
    pub to_batch: Option<BatchId>,

    pub quantity: Decimal,
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl StockMovement {
    pub fn new(
        kind: MovementKind,
        key: StockKey,
        batch_id: BatchId,
        quantity: Decimal,
        meta: &MutationMeta,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            key,
            to_location: None,
            batch_id,
            to_batch: None,
            quantity,
            actor: meta.actor.clone(),
            at: meta.at,
        }
    }

    /// 建構器模式：設置目的儲位
    pub fn with_to_location(mut self, location: impl Into<String>) -> Self {
        self.to_location = Some(location.into());
        self
    }

    /// 建構器模式：設置目的批次
    pub fn with_to_batch(mut self, batch_id: BatchId) -> Self {
        self.to_batch = Some(batch_id);
        self
    }
}
