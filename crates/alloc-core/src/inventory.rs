//! 庫存分帳與投影模型

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ensure_positive, AllocError, BatchId, Result};

/// 庫存鍵（物料 + 儲位）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    /// 物料編號
    pub sku: String,

    /// 儲位
    pub location: String,
}

impl StockKey {
    pub fn new(sku: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.sku, self.location)
    }
}

/// 分帳記錄（權威資料來源）
///
/// 每個 (物料, 儲位) 一筆，記錄各批次分到的數量。
/// `total_allocated` 永遠等於 `allocations` 的總和。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// 物料編號
    pub sku: String,

    /// 儲位
    pub location: String,

    /// 各批次分配數量（未分配的庫存記在 UNASSIGNED 下）
    allocations: BTreeMap<BatchId, Decimal>,

    /// 分配總量
    total_allocated: Decimal,

    /// 版本號，每次變更遞增
    version: u64,
}

impl LedgerEntry {
    /// 創建空的分帳記錄
    pub fn new(key: &StockKey) -> Self {
        Self {
            sku: key.sku.clone(),
            location: key.location.clone(),
            allocations: BTreeMap::new(),
            total_allocated: Decimal::ZERO,
            version: 0,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.sku.clone(), self.location.clone())
    }

    pub fn allocations(&self) -> &BTreeMap<BatchId, Decimal> {
        &self.allocations
    }

    pub fn total_allocated(&self) -> Decimal {
        self.total_allocated
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// 某批次在此儲位的分配數量
    pub fn allocated_to(&self, batch_id: &BatchId) -> Decimal {
        self.allocations
            .get(batch_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// 是否持有該批次的分配
    pub fn holds(&self, batch_id: &BatchId) -> bool {
        self.allocated_to(batch_id) > Decimal::ZERO
    }

    /// 分配庫存給批次
    pub fn allocate(&mut self, batch_id: &BatchId, quantity: Decimal) -> Result<()> {
        ensure_positive(quantity)?;
        let bucket = self
            .allocated_to(batch_id)
            .checked_add(quantity)
            .ok_or(AllocError::InvalidQuantity(quantity))?;
        let total = self
            .total_allocated
            .checked_add(quantity)
            .ok_or(AllocError::InvalidQuantity(quantity))?;

        self.allocations.insert(batch_id.clone(), bucket);
        self.total_allocated = total;
        self.version += 1;
        Ok(())
    }

    /// 釋放批次的分配
    ///
    /// 數量超過現有分配時失敗，且不產生任何部分變更。
    pub fn deallocate(&mut self, batch_id: &BatchId, quantity: Decimal) -> Result<()> {
        ensure_positive(quantity)?;
        self.ensure_available(batch_id, quantity)?;

        let remaining = self.allocated_to(batch_id) - quantity;
        if remaining.is_zero() {
            self.allocations.remove(batch_id);
        } else {
            self.allocations.insert(batch_id.clone(), remaining);
        }
        self.total_allocated -= quantity;
        self.version += 1;
        Ok(())
    }

    /// 同一儲位內，把數量從一個批次轉給另一個批次
    pub fn reassign(&mut self, from: &BatchId, to: &BatchId, quantity: Decimal) -> Result<()> {
        ensure_positive(quantity)?;
        self.ensure_available(from, quantity)?;
        if from == to {
            return Ok(());
        }
        self.deallocate(from, quantity)?;
        self.allocate(to, quantity)
    }

    /// 移除批次的全部分配，返回被釋放的數量
    pub fn remove_batch(&mut self, batch_id: &BatchId) -> Decimal {
        match self.allocations.remove(batch_id) {
            Some(freed) => {
                self.total_allocated -= freed;
                self.version += 1;
                freed
            }
            None => Decimal::ZERO,
        }
    }

    /// 檢查數量是否足夠釋放
    pub fn ensure_available(&self, batch_id: &BatchId, quantity: Decimal) -> Result<()> {
        let available = self.allocated_to(batch_id);
        if quantity > available {
            return Err(AllocError::InsufficientAllocation {
                key: self.key(),
                batch_id: batch_id.clone(),
                requested: quantity,
                available,
            });
        }
        Ok(())
    }

    /// 重新加總檢查總量是否一致
    pub fn is_consistent(&self) -> bool {
        self.total_allocated == self.allocations.values().copied().sum::<Decimal>()
    }
}

/// 庫存投影（由分帳推導出的彙總庫存）
///
/// 只能由同步流程寫入。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionEntry {
    /// 物料編號
    pub sku: String,

    /// 儲位
    pub location: String,

    /// 彙總數量
    pub amount: Decimal,

    /// 最後同步時間
    pub last_synced_at: DateTime<Utc>,
}

impl ProjectionEntry {
    /// 對分帳記錄做折疊，得到投影
    pub fn fold(entry: &LedgerEntry, synced_at: DateTime<Utc>) -> Self {
        Self {
            sku: entry.sku.clone(),
            location: entry.location.clone(),
            amount: entry.allocations.values().copied().sum(),
            last_synced_at: synced_at,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.sku.clone(), self.location.clone())
    }
}
