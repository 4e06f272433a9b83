//! 生產耗用紀錄
//!
//! 單位完工時依物料清單從分帳扣除物料，並更新批次需求。

use std::collections::BTreeMap;
use std::sync::Arc;

use alloc_core::{
    AllocError, BatchId, BatchStatus, ConsumptionSource, EngineConfig, LedgerEntry, LocationOrder,
    Result, StockKey,
};
use alloc_ledger::AllocationLedger;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::bom::BomResolver;
use crate::catalog::BatchCatalog;
use crate::requirement::RequirementTracker;
use crate::{AllocWarning, WarningKind};

/// 單位完工事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitCompletion {
    pub batch_id: BatchId,
    pub zone: String,
    pub product_type: String,

    /// 完工單位數
    pub units: u32,

    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

impl UnitCompletion {
    /// 創建單一單位的完工事件
    pub fn new(batch_id: BatchId, zone: impl Into<String>, product_type: impl Into<String>) -> Self {
        Self {
            batch_id,
            zone: zone.into(),
            product_type: product_type.into(),
            units: 1,
            actor: "system".to_string(),
            occurred_at: Utc::now(),
        }
    }

    /// 建構器模式：設置完工單位數
    pub fn with_units(mut self, units: u32) -> Self {
        self.units = units;
        self
    }

    /// 建構器模式：設置操作者
    pub fn with_actor(mut self, actor: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        self.actor = actor.into();
        self.occurred_at = occurred_at;
        self
    }
}

/// 單筆扣除明細
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumedLine {
    pub key: StockKey,

    /// 被扣除的分配桶
    pub bucket: BatchId,

    pub quantity: Decimal,
}

/// 耗用結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionReport {
    pub batch_id: BatchId,
    pub lines: Vec<ConsumedLine>,

    /// 有變更的庫存鍵（已排序、去重）
    pub touched_keys: Vec<StockKey>,

    pub warnings: Vec<AllocWarning>,

    /// 記錄完工後的批次狀態
    pub batch_status: BatchStatus,
}

impl ConsumptionReport {
    /// 某物料實際扣除的總量
    pub fn consumed_of(&self, sku: &str) -> Decimal {
        self.lines
            .iter()
            .filter(|line| line.key.sku == sku)
            .map(|line| line.quantity)
            .sum()
    }

    pub fn has_under_supply(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| w.kind == WarningKind::UnderSupply)
    }
}

/// 耗用紀錄器
pub struct ConsumptionRecorder {
    ledger: Arc<AllocationLedger>,
    tracker: Arc<RequirementTracker>,
    catalog: Arc<dyn BatchCatalog>,
    bom: Arc<dyn BomResolver>,
    location_order: LocationOrder,
    consumption_source: ConsumptionSource,
}

impl ConsumptionRecorder {
    pub fn new(
        ledger: Arc<AllocationLedger>,
        tracker: Arc<RequirementTracker>,
        catalog: Arc<dyn BatchCatalog>,
        bom: Arc<dyn BomResolver>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            ledger,
            tracker,
            catalog,
            bom,
            location_order: config.location_order,
            consumption_source: config.consumption_source,
        }
    }

    /// 記錄單位完工
    ///
    /// 先在目錄中認領完工單位，之後才扣除分帳；認領失敗時分帳不變。
    /// 可耗用量不足時只做部分扣除並返回 `UnderSupply` 警告，完工本身仍成功。
    pub fn record(&self, event: &UnitCompletion) -> Result<ConsumptionReport> {
        if event.units == 0 {
            return Err(AllocError::InvalidQuantity(Decimal::ZERO));
        }
        if self.catalog.get(&event.batch_id).is_none() {
            return Err(AllocError::BatchNotFound(event.batch_id.clone()));
        }

        let components = self.bom.resolve(&event.zone, &event.product_type)?;
        let batch = self.catalog.claim_units(&event.batch_id, event.units)?;
        let units = Decimal::from(event.units);

        let mut lines = Vec::new();
        let mut warnings = Vec::new();
        let mut consumed_by_sku: BTreeMap<String, Decimal> = BTreeMap::new();

        for component in &components {
            let needed = component.qty_per_unit * units;
            if needed <= Decimal::ZERO {
                continue;
            }

            let mut outstanding = needed;
            for (key, bucket) in self.candidates(&component.sku, &batch.id) {
                if outstanding <= Decimal::ZERO {
                    break;
                }
                let consumed = self.ledger.consume_up_to(&key, &bucket, outstanding);
                if consumed.quantity.is_zero() {
                    continue;
                }
                outstanding -= consumed.quantity;

                if let Some(err) = consumed.sync_error {
                    warnings.push(
                        AllocWarning::error(component.sku.clone(), WarningKind::SyncDeferred, err.to_string())
                            .with_batch(batch.id.clone()),
                    );
                }
                lines.push(ConsumedLine {
                    key,
                    bucket,
                    quantity: consumed.quantity,
                });
            }

            if outstanding > Decimal::ZERO {
                tracing::warn!(
                    "批次 {} 物料 {} 供應不足：需要 {}，只扣除 {}",
                    batch.id,
                    component.sku,
                    needed,
                    needed - outstanding
                );
                warnings.push(
                    AllocWarning::warning(
                        component.sku.clone(),
                        WarningKind::UnderSupply,
                        format!("需要 {}，缺少 {}", needed, outstanding),
                    )
                    .with_batch(batch.id.clone()),
                );
            }

            *consumed_by_sku
                .entry(component.sku.clone())
                .or_insert(Decimal::ZERO) += needed - outstanding;
        }

        for (sku, quantity) in consumed_by_sku {
            if quantity <= Decimal::ZERO {
                continue;
            }
            match self.tracker.record_consumption(&batch.id, &sku, quantity) {
                Ok(Some(warning)) => warnings.push(warning),
                Ok(None) => {}
                Err(AllocError::RequirementNotFound { .. }) => {
                    tracing::warn!("批次 {} 沒有物料 {} 的需求，耗用 {} 未追蹤", batch.id, sku, quantity);
                    warnings.push(
                        AllocWarning::info(
                            sku,
                            WarningKind::UntrackedComponent,
                            format!("耗用 {} 不在批次需求內", quantity),
                        )
                        .with_batch(batch.id.clone()),
                    );
                }
                Err(err) => {
                    tracing::error!("批次 {} 物料 {} 需求更新失敗: {}", batch.id, sku, err);
                    warnings.push(
                        AllocWarning::error(sku, WarningKind::UntrackedComponent, err.to_string())
                            .with_batch(batch.id.clone()),
                    );
                }
            }
        }

        let mut touched_keys: Vec<StockKey> = lines.iter().map(|line| line.key.clone()).collect();
        touched_keys.sort();
        touched_keys.dedup();

        tracing::info!(
            "批次 {} 完工 {} 單位（{}），扣除 {} 筆，警告 {} 筆",
            batch.id,
            event.units,
            event.actor,
            lines.len(),
            warnings.len()
        );

        Ok(ConsumptionReport {
            batch_id: batch.id,
            lines,
            touched_keys,
            warnings,
            batch_status: batch.status,
        })
    }

    /// 依策略與儲位順序列出可扣除的 (庫存鍵, 分配桶)
    fn candidates(&self, sku: &str, batch_id: &BatchId) -> Vec<(StockKey, BatchId)> {
        let rows = self.ledger.rows_for_sku(sku);

        let mut buckets = vec![batch_id.clone()];
        if self.consumption_source == ConsumptionSource::OwnThenUnassigned && !batch_id.is_unassigned() {
            buckets.push(BatchId::unassigned());
        }

        buckets
            .into_iter()
            .flat_map(|bucket| {
                let mut holding: Vec<&LedgerEntry> = rows.iter().filter(|e| e.holds(&bucket)).collect();
                self.sort_rows(&mut holding, &bucket);
                holding
                    .into_iter()
                    .map(|entry| (entry.key(), bucket.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn sort_rows(&self, rows: &mut [&LedgerEntry], bucket: &BatchId) {
        match self.location_order {
            LocationOrder::Lexicographic => rows.sort_by(|a, b| a.location.cmp(&b.location)),
            LocationOrder::LargestFirst => rows.sort_by(|a, b| {
                b.allocated_to(bucket)
                    .cmp(&a.allocated_to(bucket))
                    .then_with(|| a.location.cmp(&b.location))
            }),
            LocationOrder::SmallestFirst => rows.sort_by(|a, b| {
                a.allocated_to(bucket)
                    .cmp(&b.allocated_to(bucket))
                    .then_with(|| a.location.cmp(&b.location))
            }),
        }
    }
}
