//! 批次目錄
//!
//! 批次的中繼資料（優先序、單位數、物料清單、狀態轉換）由目錄提供，
//! 分配核心只擁有需求與分帳。

use std::sync::atomic::{AtomicU64, Ordering};

use alloc_core::{AllocError, Batch, BatchId, BatchStatus, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// 批次目錄介面
pub trait BatchCatalog: Send + Sync {
    /// 新增規劃中的批次
    fn insert(&self, batch: Batch) -> Result<()>;

    fn get(&self, batch_id: &BatchId) -> Option<Batch>;

    /// 生產中的批次，依優先序由高到低
    fn active_batches(&self) -> Vec<Batch>;

    /// 規劃中 → 生產中，並指派下一個優先序
    fn mark_active(&self, batch_id: &BatchId) -> Result<Batch>;

    /// 在批次鎖內檢查並記錄完成單位數，全部完成時轉為已完成
    ///
    /// 批次不在生產中或超過剩餘單位數時失敗，不做任何變更。
    fn claim_units(&self, batch_id: &BatchId, units: u32) -> Result<Batch>;

    fn remove(&self, batch_id: &BatchId) -> Result<Batch>;
}

/// 記憶體批次目錄
#[derive(Debug)]
pub struct InMemoryBatchCatalog {
    batches: DashMap<BatchId, Batch>,
    next_rank: AtomicU64,
}

impl InMemoryBatchCatalog {
    pub fn new() -> Self {
        Self {
            batches: DashMap::new(),
            next_rank: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryBatchCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchCatalog for InMemoryBatchCatalog {
    fn insert(&self, mut batch: Batch) -> Result<()> {
        match self.batches.entry(batch.id.clone()) {
            Entry::Occupied(_) => Err(AllocError::Store(format!("批次 {} 已存在", batch.id))),
            Entry::Vacant(slot) => {
                batch.status = BatchStatus::Planning;
                batch.priority_rank = None;
                slot.insert(batch);
                Ok(())
            }
        }
    }

    fn get(&self, batch_id: &BatchId) -> Option<Batch> {
        self.batches.get(batch_id).map(|b| b.value().clone())
    }

    fn active_batches(&self) -> Vec<Batch> {
        let mut active: Vec<Batch> = self
            .batches
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.value().clone())
            .collect();
        active.sort_by_key(|b| b.priority_rank);
        active
    }

    fn mark_active(&self, batch_id: &BatchId) -> Result<Batch> {
        let mut batch = self
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| AllocError::BatchNotFound(batch_id.clone()))?;
        if batch.status != BatchStatus::Planning {
            return Err(AllocError::InvalidBatchState {
                batch_id: batch_id.clone(),
                status: batch.status,
                operation: "activate",
            });
        }
        let rank = self.next_rank.fetch_add(1, Ordering::SeqCst);
        batch.activate(rank)?;
        Ok(batch.clone())
    }

    fn claim_units(&self, batch_id: &BatchId, units: u32) -> Result<Batch> {
        let mut batch = self
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| AllocError::BatchNotFound(batch_id.clone()))?;
        batch.complete_units(units)?;
        Ok(batch.clone())
    }

    fn remove(&self, batch_id: &BatchId) -> Result<Batch> {
        self.batches
            .remove(batch_id)
            .map(|(_, batch)| batch)
            .ok_or_else(|| AllocError::BatchNotFound(batch_id.clone()))
    }
}
