//! 生產批次模型

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AllocError, Result};

/// 未分配庫存的保留批次編號
pub const UNASSIGNED: &str = "UNASSIGNED";

/// 批次編號
///
/// 未分配庫存也是一個普通的批次編號（[`UNASSIGNED`]）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 未分配桶
    pub fn unassigned() -> Self {
        Self(UNASSIGNED.to_string())
    }

    pub fn is_unassigned(&self) -> bool {
        self.0 == UNASSIGNED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// 批次狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// 規劃中
    Planning,
    /// 生產中
    Active,
    /// 已完成
    Completed,
}

/// 物料清單行（每單位用量）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentLine {
    /// 物料編號
    pub sku: String,

    /// 每單位用量
    pub qty_per_unit: Decimal,
}

impl ComponentLine {
    pub fn new(sku: impl Into<String>, qty_per_unit: Decimal) -> Self {
        Self {
            sku: sku.into(),
            qty_per_unit,
        }
    }
}

/// 生產批次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// 批次編號
    pub id: BatchId,

    /// 優先序（啟用時指派，數字越小優先級越高）
    pub priority_rank: Option<u64>,

    /// 總生產單位數
    pub total_units: u32,

    /// 已完成單位數
    pub units_completed: u32,

    /// 狀態
    pub status: BatchStatus,

    /// 啟用時用於建立需求的物料清單
    pub components: Vec<ComponentLine>,
}

impl Batch {
    /// 創建規劃中的批次
    pub fn new(id: impl Into<BatchId>, total_units: u32, components: Vec<ComponentLine>) -> Self {
        Self {
            id: id.into(),
            priority_rank: None,
            total_units,
            units_completed: 0,
            status: BatchStatus::Planning,
            components,
        }
    }

    /// 建構器模式：設置已完成單位數
    pub fn with_units_completed(mut self, units_completed: u32) -> Self {
        self.units_completed = units_completed.min(self.total_units);
        self
    }

    /// 剩餘待生產單位數
    pub fn units_left(&self) -> u32 {
        self.total_units.saturating_sub(self.units_completed)
    }

    pub fn is_active(&self) -> bool {
        self.status == BatchStatus::Active
    }

    /// 啟用批次並指派優先序
    pub fn activate(&mut self, priority_rank: u64) -> Result<()> {
        if self.status != BatchStatus::Planning {
            return Err(AllocError::InvalidBatchState {
                batch_id: self.id.clone(),
                status: self.status,
                operation: "activate",
            });
        }
        self.priority_rank = Some(priority_rank);
        self.status = BatchStatus::Active;
        Ok(())
    }

    /// 記錄完成單位數；全部完成時轉為已完成
    ///
    /// 超過剩餘單位數時失敗，不做任何變更。
    pub fn complete_units(&mut self, units: u32) -> Result<()> {
        if self.status != BatchStatus::Active {
            return Err(AllocError::InvalidBatchState {
                batch_id: self.id.clone(),
                status: self.status,
                operation: "complete units",
            });
        }
        if units > self.units_left() {
            return Err(AllocError::ExceedsUnitsLeft {
                batch_id: self.id.clone(),
                requested: units,
                units_left: self.units_left(),
            });
        }
        self.units_completed += units;
        if self.units_completed == self.total_units {
            self.status = BatchStatus::Completed;
        }
        Ok(())
    }
}
