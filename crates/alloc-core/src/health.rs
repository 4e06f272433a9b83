//! 批次健康報告

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::BatchId;

/// 健康狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 所有需求都能滿足
    Healthy,
    /// 有缺料，但仍可生產部分單位
    Warning,
    /// 有缺料，無法生產任何單位
    Critical,
}

/// 缺料明細
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortage {
    pub sku: String,
    pub needed: Decimal,
    pub available: Decimal,
    pub shortfall: Decimal,
}

/// 批次可行性報告（計算結果，不持久化）
///
/// 報告只代表 `as_of` 當下的狀態，不是庫存保留。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub batch_id: BatchId,
    pub priority_rank: Option<u64>,
    pub status: HealthStatus,
    pub units_left: u32,
    pub units_producible: u32,
    pub shortages: Vec<Shortage>,
    pub as_of: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// 所有缺料的缺口總量
    pub fn total_shortfall(&self) -> Decimal {
        self.shortages.iter().map(|s| s.shortfall).sum()
    }
}
