//! 分配引擎
//!
//! 組合分帳、需求追蹤、批次目錄與耗用紀錄，提供庫存異動、批次生命週期
//! 與報表查詢的入口。

use std::collections::HashMap;
use std::sync::Arc;

use alloc_calc::{
    BatchCatalog, BomResolver, ConsumptionRecorder, ConsumptionReport, InMemoryBatchCatalog,
    PriorityAllocationSimulator, RequirementTracker, UnitCompletion,
};
use alloc_core::{
    AllocError, Batch, BatchId, BatchStatus, DeletionPolicy, EngineConfig, HealthReport,
    LedgerEntry, LossReason, MovementKind, MutationMeta, ProjectionEntry, Requirement, Result,
    StockKey, StockMovement,
};
use alloc_ledger::{
    AllocationLedger, InMemoryProjectionStore, ProjectionStore, ReconciliationReport,
};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

/// 批次刪除結果
#[derive(Debug, Clone)]
pub struct DeletionReport {
    pub batch_id: BatchId,
    pub policy: DeletionPolicy,

    /// 每個庫存鍵釋放的數量
    pub released: Vec<(StockKey, Decimal)>,

    pub requirements_removed: usize,

    /// 投影同步失敗、需要修復的庫存鍵
    pub stale_keys: Vec<StockKey>,
}

/// 分配引擎
pub struct AllocationEngine {
    config: EngineConfig,
    ledger: Arc<AllocationLedger>,
    tracker: Arc<RequirementTracker>,
    catalog: Arc<dyn BatchCatalog>,
    recorder: ConsumptionRecorder,
    movements: Mutex<Vec<StockMovement>>,
}

impl AllocationEngine {
    /// 創建新的分配引擎
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ProjectionStore>,
        catalog: Arc<dyn BatchCatalog>,
        bom: Arc<dyn BomResolver>,
    ) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(AllocationLedger::new(store, config.sync_retry));
        let tracker = Arc::new(RequirementTracker::new());
        let recorder = ConsumptionRecorder::new(
            Arc::clone(&ledger),
            Arc::clone(&tracker),
            Arc::clone(&catalog),
            bom,
            &config,
        );

        Ok(Self {
            config,
            ledger,
            tracker,
            catalog,
            recorder,
            movements: Mutex::new(Vec::new()),
        })
    }

    /// 使用記憶體投影儲存與記憶體批次目錄
    pub fn in_memory(config: EngineConfig, bom: Arc<dyn BomResolver>) -> Result<Self> {
        Self::new(
            config,
            Arc::new(InMemoryProjectionStore::new()),
            Arc::new(InMemoryBatchCatalog::new()),
            bom,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 分帳已提交（包含投影同步失敗）時記錄異動
    fn audited<T>(&self, result: Result<T>, movement: impl FnOnce() -> StockMovement) -> Result<T> {
        if matches!(result, Ok(_) | Err(AllocError::SyncFailure { .. })) {
            self.movements.lock().push(movement());
        }
        result
    }

    // ---- 庫存異動 ----

    /// 收貨入帳（批次或 UNASSIGNED）
    pub fn receive(
        &self,
        key: &StockKey,
        batch_id: &BatchId,
        quantity: Decimal,
        meta: &MutationMeta,
    ) -> Result<LedgerEntry> {
        let result = self.ledger.allocate(key, batch_id, quantity);
        self.audited(result, || {
            StockMovement::new(MovementKind::Receipt, key.clone(), batch_id.clone(), quantity, meta)
        })
    }

    /// 分配數量給批次
    pub fn allocate(
        &self,
        key: &StockKey,
        batch_id: &BatchId,
        quantity: Decimal,
        meta: &MutationMeta,
    ) -> Result<LedgerEntry> {
        let result = self.ledger.allocate(key, batch_id, quantity);
        self.audited(result, || {
            StockMovement::new(MovementKind::Allocation, key.clone(), batch_id.clone(), quantity, meta)
        })
    }

    /// 釋放批次的分配
    pub fn deallocate(
        &self,
        key: &StockKey,
        batch_id: &BatchId,
        quantity: Decimal,
        meta: &MutationMeta,
    ) -> Result<LedgerEntry> {
        let result = self.ledger.deallocate(key, batch_id, quantity);
        self.audited(result, || {
            StockMovement::new(MovementKind::Deallocation, key.clone(), batch_id.clone(), quantity, meta)
        })
    }

    /// 儲位調撥
    pub fn transfer(
        &self,
        sku: &str,
        from_location: &str,
        to_location: &str,
        batch_id: &BatchId,
        quantity: Decimal,
        meta: &MutationMeta,
    ) -> Result<(LedgerEntry, LedgerEntry)> {
        let result = self
            .ledger
            .move_stock(sku, from_location, to_location, batch_id, quantity);
        self.audited(result, || {
            StockMovement::new(
                MovementKind::Transfer,
                StockKey::new(sku, from_location),
                batch_id.clone(),
                quantity,
                meta,
            )
            .with_to_location(to_location)
        })
    }

    /// 同一儲位內批次間轉撥
    pub fn reassign(
        &self,
        key: &StockKey,
        from_batch: &BatchId,
        to_batch: &BatchId,
        quantity: Decimal,
        meta: &MutationMeta,
    ) -> Result<LedgerEntry> {
        let result = self.ledger.reassign(key, from_batch, to_batch, quantity);
        self.audited(result, || {
            StockMovement::new(MovementKind::Reassignment, key.clone(), from_batch.clone(), quantity, meta)
                .with_to_batch(to_batch.clone())
        })
    }

    /// 報廢、遺失、不良品
    pub fn report_loss(
        &self,
        key: &StockKey,
        batch_id: &BatchId,
        quantity: Decimal,
        reason: LossReason,
        meta: &MutationMeta,
    ) -> Result<LedgerEntry> {
        let result = self.ledger.deallocate(key, batch_id, quantity);
        if result.is_ok() {
            tracing::info!("{} 批次 {} 損耗 {} ({:?})", key, batch_id, quantity, reason);
        }
        self.audited(result, || {
            StockMovement::new(MovementKind::Loss(reason), key.clone(), batch_id.clone(), quantity, meta)
        })
    }

    /// 手動重新同步投影
    pub fn sync_projection(&self, key: &StockKey) -> Result<ProjectionEntry> {
        self.ledger.sync_projection(key)
    }

    // ---- 批次生命週期 ----

    /// 新增規劃中的批次
    pub fn create_batch(&self, batch: Batch) -> Result<()> {
        tracing::info!("新增批次 {}（{} 單位）", batch.id, batch.total_units);
        self.catalog.insert(batch)
    }

    /// 啟用批次並建立需求
    ///
    /// 已有需求時失敗，必須先 [`reset_requirements`](Self::reset_requirements)。
    pub fn activate_batch(&self, batch_id: &BatchId) -> Result<Vec<Requirement>> {
        let batch = self
            .catalog
            .get(batch_id)
            .ok_or_else(|| AllocError::BatchNotFound(batch_id.clone()))?;
        if self.tracker.is_activated(batch_id) {
            return Err(AllocError::AlreadyActivated(batch_id.clone()));
        }

        let batch = match batch.status {
            BatchStatus::Planning => self.catalog.mark_active(batch_id)?,
            BatchStatus::Active => batch,
            BatchStatus::Completed => {
                return Err(AllocError::InvalidBatchState {
                    batch_id: batch_id.clone(),
                    status: batch.status,
                    operation: "activate",
                })
            }
        };

        let requirements = self.tracker.activate(&batch)?;
        tracing::info!(
            "批次 {} 啟用，優先序 {:?}",
            batch_id,
            batch.priority_rank
        );
        Ok(requirements)
    }

    /// 清除批次需求
    pub fn reset_requirements(&self, batch_id: &BatchId) -> Result<Vec<Requirement>> {
        let removed = self.tracker.reset(batch_id)?;
        tracing::info!("批次 {} 需求已重置（{} 筆）", batch_id, removed.len());
        Ok(removed)
    }

    /// 重置後以目前的物料清單重新建立需求
    ///
    /// 只適用於生產中的批次；其他狀態直接失敗，需求保持不變。
    pub fn reactivate_batch(&self, batch_id: &BatchId) -> Result<Vec<Requirement>> {
        let batch = self
            .catalog
            .get(batch_id)
            .ok_or_else(|| AllocError::BatchNotFound(batch_id.clone()))?;
        if !batch.is_active() {
            return Err(AllocError::InvalidBatchState {
                batch_id: batch_id.clone(),
                status: batch.status,
                operation: "reactivate",
            });
        }

        let removed = self.tracker.remove_batch(batch_id).unwrap_or_default();
        tracing::info!("批次 {} 需求已重置（{} 筆）", batch_id, removed.len());
        self.activate_batch(batch_id)
    }

    /// 刪除批次、需求與分帳中的批次分配
    ///
    /// 先從目錄移除，之後的耗用就無法再指向此批次；每個分帳列在自己的鎖內釋放。
    pub fn delete_batch(&self, batch_id: &BatchId) -> Result<DeletionReport> {
        let meta = MutationMeta::now("batch-deletion");
        self.catalog.remove(batch_id)?;
        let requirements_removed = self
            .tracker
            .remove_batch(batch_id)
            .map(|reqs| reqs.len())
            .unwrap_or(0);

        let policy = self.config.deletion_policy;
        let outcome = self.ledger.release_batch(batch_id, policy);

        {
            let mut movements = self.movements.lock();
            for (key, freed) in &outcome.released {
                let movement =
                    StockMovement::new(MovementKind::BatchRelease, key.clone(), batch_id.clone(), *freed, &meta);
                movements.push(match policy {
                    DeletionPolicy::ReleaseToUnassigned => movement.with_to_batch(BatchId::unassigned()),
                    DeletionPolicy::Discard => movement,
                });
            }
        }

        if !outcome.stale.is_empty() {
            tracing::error!(
                "刪除批次 {} 後 {} 個庫存鍵投影同步失敗，需要修復",
                batch_id,
                outcome.stale.len()
            );
        }
        tracing::info!(
            "批次 {} 已刪除：釋放 {}（{:?}），移除需求 {} 筆",
            batch_id,
            outcome.total_released(),
            policy,
            requirements_removed
        );

        Ok(DeletionReport {
            batch_id: batch_id.clone(),
            policy,
            released: outcome.released,
            requirements_removed,
            stale_keys: outcome.stale,
        })
    }

    /// 記錄單位完工並扣除物料
    pub fn record_unit_completion(&self, event: &UnitCompletion) -> Result<ConsumptionReport> {
        let report = self.recorder.record(event)?;

        let meta = MutationMeta::new(event.actor.clone(), event.occurred_at);
        let mut movements = self.movements.lock();
        for line in &report.lines {
            movements.push(StockMovement::new(
                MovementKind::Consumption,
                line.key.clone(),
                line.bucket.clone(),
                line.quantity,
                &meta,
            ));
        }
        Ok(report)
    }

    // ---- 報表 ----

    /// 所有生產中批次的健康報告（每次重新計算）
    pub fn get_all_health_reports(&self) -> Result<Vec<HealthReport>> {
        let batches = self.catalog.active_batches();
        let requirements: HashMap<BatchId, Vec<Requirement>> = batches
            .iter()
            .map(|batch| (batch.id.clone(), self.tracker.requirements(&batch.id)))
            .collect();
        let stock = self.ledger.projection().aggregate_by_sku()?;

        let reports = PriorityAllocationSimulator::simulate(
            &batches,
            &requirements,
            &stock,
            self.config.reserve_partial_demand,
            Utc::now(),
        );

        tracing::info!(
            "健康檢查：{} 個批次，{} 個不健康",
            reports.len(),
            reports.iter().filter(|r| !r.is_healthy()).count()
        );
        Ok(reports)
    }

    /// 單一批次的健康報告
    pub fn get_health_report(&self, batch_id: &BatchId) -> Result<HealthReport> {
        self.get_all_health_reports()?
            .into_iter()
            .find(|report| &report.batch_id == batch_id)
            .ok_or_else(|| AllocError::BatchNotFound(batch_id.clone()))
    }

    pub fn get_projection(&self, key: &StockKey) -> Result<Option<ProjectionEntry>> {
        self.ledger.projection().get(key)
    }

    pub fn get_ledger(&self, key: &StockKey) -> Option<LedgerEntry> {
        self.ledger.get(key)
    }

    pub fn get_batch(&self, batch_id: &BatchId) -> Option<Batch> {
        self.catalog.get(batch_id)
    }

    pub fn requirements(&self, batch_id: &BatchId) -> Vec<Requirement> {
        self.tracker.requirements(batch_id)
    }

    pub fn ledger_snapshot(&self) -> Vec<LedgerEntry> {
        self.ledger.snapshot()
    }

    pub fn reconcile(&self) -> Result<ReconciliationReport> {
        self.ledger.reconcile()
    }

    pub fn repair(&self) -> Result<ReconciliationReport> {
        self.ledger.repair()
    }

    pub fn dirty_keys(&self) -> Vec<StockKey> {
        self.ledger.dirty_keys()
    }

    /// 異動稽核記錄
    pub fn movements(&self) -> Vec<StockMovement> {
        self.movements.lock().clone()
    }
}
