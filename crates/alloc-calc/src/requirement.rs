//! 批次需求追蹤

use std::collections::BTreeMap;

use alloc_core::{AllocError, Batch, BatchId, Requirement, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::{AllocWarning, WarningKind};

/// 批次需求追蹤器
///
/// 每個批次一組需求，依物料排序。同一批次的啟用與耗用由 DashMap 的
/// 分片鎖序列化。
#[derive(Debug, Default)]
pub struct RequirementTracker {
    rows: DashMap<BatchId, BTreeMap<String, Requirement>>,
}

impl RequirementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依批次的物料清單建立需求
    ///
    /// `total_needed = qty_per_unit * total_units`，同一物料出現多次時合併。
    /// 已有需求時失敗，必須先 [`reset`](Self::reset)。
    pub fn activate(&self, batch: &Batch) -> Result<Vec<Requirement>> {
        match self.rows.entry(batch.id.clone()) {
            Entry::Occupied(_) => Err(AllocError::AlreadyActivated(batch.id.clone())),
            Entry::Vacant(slot) => {
                let units = Decimal::from(batch.total_units);
                let mut requirements: BTreeMap<String, Requirement> = BTreeMap::new();
                for line in &batch.components {
                    requirements
                        .entry(line.sku.clone())
                        .and_modify(|req| {
                            req.total_needed += line.qty_per_unit * units;
                            req.remaining = req.total_needed;
                        })
                        .or_insert_with(|| {
                            Requirement::new(batch.id.clone(), line.sku.clone(), line.qty_per_unit * units)
                        });
                }

                tracing::info!("批次 {} 建立 {} 筆需求", batch.id, requirements.len());
                let created = requirements.values().cloned().collect();
                slot.insert(requirements);
                Ok(created)
            }
        }
    }

    /// 記錄耗用
    ///
    /// 超過剩餘需求時剩餘歸零並返回警告，不視為錯誤。
    pub fn record_consumption(
        &self,
        batch_id: &BatchId,
        sku: &str,
        quantity: Decimal,
    ) -> Result<Option<AllocWarning>> {
        alloc_core::ensure_positive(quantity)?;
        let mut requirements = self
            .rows
            .get_mut(batch_id)
            .ok_or_else(|| AllocError::RequirementNotFound {
                batch_id: batch_id.clone(),
                sku: sku.to_string(),
            })?;
        let req = requirements
            .get_mut(sku)
            .ok_or_else(|| AllocError::RequirementNotFound {
                batch_id: batch_id.clone(),
                sku: sku.to_string(),
            })?;

        let excess = req.record_consumption(quantity);
        tracing::debug!(
            "批次 {} 物料 {} 耗用 {}，剩餘 {}",
            batch_id,
            sku,
            quantity,
            req.remaining
        );

        if excess > Decimal::ZERO {
            tracing::warn!("批次 {} 物料 {} 超耗 {}", batch_id, sku, excess);
            return Ok(Some(
                AllocWarning::warning(
                    sku.to_string(),
                    WarningKind::OverConsumption,
                    format!("耗用超過剩餘需求 {}", excess),
                )
                .with_batch(batch_id.clone()),
            ));
        }
        Ok(None)
    }

    /// 清除批次需求，允許重新啟用
    pub fn reset(&self, batch_id: &BatchId) -> Result<Vec<Requirement>> {
        self.remove_batch(batch_id)
            .ok_or_else(|| AllocError::BatchNotFound(batch_id.clone()))
    }

    /// 移除批次的全部需求
    pub fn remove_batch(&self, batch_id: &BatchId) -> Option<Vec<Requirement>> {
        self.rows
            .remove(batch_id)
            .map(|(_, requirements)| requirements.into_values().collect())
    }

    pub fn is_activated(&self, batch_id: &BatchId) -> bool {
        self.rows.contains_key(batch_id)
    }

    /// 批次的全部需求（依物料排序）
    pub fn requirements(&self, batch_id: &BatchId) -> Vec<Requirement> {
        self.rows
            .get(batch_id)
            .map(|requirements| requirements.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, batch_id: &BatchId, sku: &str) -> Option<Requirement> {
        self.rows
            .get(batch_id)
            .and_then(|requirements| requirements.get(sku).cloned())
    }

    /// 全部需求快照
    pub fn snapshot(&self) -> Vec<Requirement> {
        let mut all: Vec<Requirement> = self
            .rows
            .iter()
            .flat_map(|row| row.value().values().cloned().collect::<Vec<_>>())
            .collect();
        all.sort_by(|a, b| (&a.batch_id, &a.sku).cmp(&(&b.batch_id, &b.sku)));
        all
    }
}
