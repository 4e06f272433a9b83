//! 批次分帳
//!
//! 每個庫存鍵一把鎖。「讀取分帳 → 套用變更 → 寫回分帳 → 重建投影」
//! 在同一把鎖內完成，不同庫存鍵之間可以並行。

use std::sync::Arc;

use alloc_core::{
    ensure_positive, AllocError, BatchId, DeletionPolicy, LedgerEntry, ProjectionEntry, Result,
    StockKey, SyncRetryPolicy,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::projection::{InMemoryProjectionStore, ProjectionStore, ProjectionView};
use crate::sync::Synchronizer;

type Row = Arc<Mutex<LedgerEntry>>;

/// 耗用結果
#[derive(Debug)]
pub struct Consumed {
    /// 實際扣除的數量
    pub quantity: Decimal,

    /// 分帳已扣除但投影同步失敗時的錯誤
    pub sync_error: Option<AllocError>,
}

/// 批次釋放結果
#[derive(Debug, Default)]
pub struct ReleaseOutcome {
    /// 每個庫存鍵釋放的數量
    pub released: Vec<(StockKey, Decimal)>,

    /// 投影同步失敗的庫存鍵
    pub stale: Vec<StockKey>,
}

impl ReleaseOutcome {
    pub fn total_released(&self) -> Decimal {
        self.released.iter().map(|(_, qty)| *qty).sum()
    }
}

/// 批次分帳
pub struct AllocationLedger {
    rows: DashMap<StockKey, Row>,
    sync: Synchronizer,
}

impl AllocationLedger {
    pub fn new(store: Arc<dyn ProjectionStore>, policy: SyncRetryPolicy) -> Self {
        Self {
            rows: DashMap::new(),
            sync: Synchronizer::new(store, policy),
        }
    }

    /// 使用記憶體投影儲存
    pub fn in_memory(policy: SyncRetryPolicy) -> Self {
        Self::new(Arc::new(InMemoryProjectionStore::new()), policy)
    }

    /// 取得（或建立）庫存鍵對應的列
    fn row(&self, key: &StockKey) -> Row {
        self.rows
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LedgerEntry::new(key))))
            .clone()
    }

    fn existing_row(&self, key: &StockKey) -> Option<Row> {
        self.rows.get(key).map(|row| Arc::clone(row.value()))
    }

    /// 建立後從未成功變更過的列（例如失敗的移動留下的目的列）
    fn is_untouched(entry: &LedgerEntry) -> bool {
        entry.version() == 0
    }

    fn missing_allocation(key: &StockKey, batch_id: &BatchId, requested: Decimal) -> AllocError {
        AllocError::InsufficientAllocation {
            key: key.clone(),
            batch_id: batch_id.clone(),
            requested,
            available: Decimal::ZERO,
        }
    }

    /// 分配數量給批次
    pub fn allocate(&self, key: &StockKey, batch_id: &BatchId, quantity: Decimal) -> Result<LedgerEntry> {
        ensure_positive(quantity)?;
        let row = self.row(key);
        let mut entry = row.lock();

        entry.allocate(batch_id, quantity)?;
        tracing::debug!("分配 {} 批次 {} +{}", key, batch_id, quantity);

        self.sync.sync_entry(&entry)?;
        Ok(entry.clone())
    }

    /// 釋放批次的分配
    pub fn deallocate(&self, key: &StockKey, batch_id: &BatchId, quantity: Decimal) -> Result<LedgerEntry> {
        ensure_positive(quantity)?;
        let row = self
            .existing_row(key)
            .ok_or_else(|| Self::missing_allocation(key, batch_id, quantity))?;
        let mut entry = row.lock();

        entry.deallocate(batch_id, quantity)?;
        tracing::debug!("釋放 {} 批次 {} -{}", key, batch_id, quantity);

        self.sync.sync_entry(&entry)?;
        Ok(entry.clone())
    }

    /// 儲位間移動批次的分配
    ///
    /// 兩個庫存鍵依排序加鎖，對讀取者而言整個移動是原子的。
    pub fn move_stock(
        &self,
        sku: &str,
        from_location: &str,
        to_location: &str,
        batch_id: &BatchId,
        quantity: Decimal,
    ) -> Result<(LedgerEntry, LedgerEntry)> {
        ensure_positive(quantity)?;
        let from_key = StockKey::new(sku, from_location);
        let to_key = StockKey::new(sku, to_location);
        let from_row = self
            .existing_row(&from_key)
            .ok_or_else(|| Self::missing_allocation(&from_key, batch_id, quantity))?;

        {
            let entry = from_row.lock();
            entry.ensure_available(batch_id, quantity)?;
            if from_key == to_key {
                return Ok((entry.clone(), entry.clone()));
            }
        }

        // 來源檢查與加鎖之間若被搶先扣除，目的列可能留空；未變更過的列對讀取者不可見
        let to_row = self.row(&to_key);
        let (mut from_entry, mut to_entry) = if from_key < to_key {
            let from_entry = from_row.lock();
            (from_entry, to_row.lock())
        } else {
            let to_entry = to_row.lock();
            (from_row.lock(), to_entry)
        };

        from_entry.deallocate(batch_id, quantity)?;
        to_entry.allocate(batch_id, quantity)?;
        tracing::debug!(
            "移動 {} 批次 {} {} → {}",
            quantity,
            batch_id,
            from_key,
            to_key
        );

        let from_synced = self.sync.sync_entry(&from_entry);
        let to_synced = self.sync.sync_entry(&to_entry);
        from_synced?;
        to_synced?;

        Ok((from_entry.clone(), to_entry.clone()))
    }

    /// 同一儲位內把分配從一個批次轉給另一個批次
    pub fn reassign(
        &self,
        key: &StockKey,
        from_batch: &BatchId,
        to_batch: &BatchId,
        quantity: Decimal,
    ) -> Result<LedgerEntry> {
        ensure_positive(quantity)?;
        let row = self
            .existing_row(key)
            .ok_or_else(|| Self::missing_allocation(key, from_batch, quantity))?;
        let mut entry = row.lock();

        entry.reassign(from_batch, to_batch, quantity)?;
        tracing::debug!("轉撥 {} {} {} → {}", key, quantity, from_batch, to_batch);

        self.sync.sync_entry(&entry)?;
        Ok(entry.clone())
    }

    /// 在鎖內扣除至多 `max_quantity`，返回實際扣除量
    pub fn consume_up_to(&self, key: &StockKey, bucket: &BatchId, max_quantity: Decimal) -> Consumed {
        let nothing = Consumed {
            quantity: Decimal::ZERO,
            sync_error: None,
        };
        if max_quantity <= Decimal::ZERO {
            return nothing;
        }
        let Some(row) = self.existing_row(key) else {
            return nothing;
        };
        let mut entry = row.lock();

        let taken = entry.allocated_to(bucket).min(max_quantity);
        if taken <= Decimal::ZERO {
            return nothing;
        }
        if let Err(err) = entry.deallocate(bucket, taken) {
            // 已在鎖內確認數量，不應發生
            tracing::error!("耗用 {} 批次 {} 失敗: {}", key, bucket, err);
            return nothing;
        }
        tracing::debug!("耗用 {} 批次 {} -{}", key, bucket, taken);

        Consumed {
            quantity: taken,
            sync_error: self.sync.sync_entry(&entry).err(),
        }
    }

    /// 移除批次在所有儲位的分配
    pub fn release_batch(&self, batch_id: &BatchId, policy: DeletionPolicy) -> ReleaseOutcome {
        let mut outcome = ReleaseOutcome::default();
        let pool = BatchId::unassigned();

        for key in self.keys_holding(batch_id) {
            let Some(row) = self.existing_row(&key) else {
                continue;
            };
            let mut entry = row.lock();

            let freed = entry.remove_batch(batch_id);
            if freed.is_zero() {
                continue;
            }
            if policy == DeletionPolicy::ReleaseToUnassigned && !batch_id.is_unassigned() {
                if let Err(err) = entry.allocate(&pool, freed) {
                    tracing::error!("釋放 {} 到未分配失敗: {}", key, err);
                }
            }
            tracing::debug!("刪除批次 {} 釋放 {} {} ({:?})", batch_id, key, freed, policy);

            if self.sync.sync_entry(&entry).is_err() {
                outcome.stale.push(key.clone());
            }
            outcome.released.push((key, freed));
        }

        outcome
    }

    /// 重新同步單一庫存鍵的投影
    pub fn sync_projection(&self, key: &StockKey) -> Result<ProjectionEntry> {
        let row = self
            .existing_row(key)
            .ok_or_else(|| AllocError::LedgerNotFound(key.clone()))?;
        let entry = row.lock();
        if Self::is_untouched(&entry) {
            return Err(AllocError::LedgerNotFound(key.clone()));
        }
        self.sync.sync_entry(&entry)
    }

    /// 讀取分帳記錄
    pub fn get(&self, key: &StockKey) -> Option<LedgerEntry> {
        self.existing_row(key)
            .map(|row| row.lock().clone())
            .filter(|entry| !Self::is_untouched(entry))
    }

    /// 全部庫存鍵（已排序）
    pub fn keys(&self) -> Vec<StockKey> {
        self.snapshot().into_iter().map(|entry| entry.key()).collect()
    }

    /// 某物料在所有儲位的分帳記錄
    pub fn rows_for_sku(&self, sku: &str) -> Vec<LedgerEntry> {
        let rows: Vec<Row> = self
            .rows
            .iter()
            .filter(|row| row.key().sku == sku)
            .map(|row| Arc::clone(row.value()))
            .collect();

        let mut entries: Vec<LedgerEntry> = rows
            .iter()
            .map(|row| row.lock().clone())
            .filter(|entry| !Self::is_untouched(entry))
            .collect();
        entries.sort_by(|a, b| a.location.cmp(&b.location));
        entries
    }

    /// 持有該批次分配的庫存鍵
    pub fn keys_holding(&self, batch_id: &BatchId) -> Vec<StockKey> {
        self.snapshot()
            .into_iter()
            .filter(|entry| entry.holds(batch_id))
            .map(|entry| entry.key())
            .collect()
    }

    /// 全部分帳記錄快照（依庫存鍵排序）
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        let rows: Vec<Row> = self
            .rows
            .iter()
            .map(|row| Arc::clone(row.value()))
            .collect();

        let mut entries: Vec<LedgerEntry> = rows
            .iter()
            .map(|row| row.lock().clone())
            .filter(|entry| !Self::is_untouched(entry))
            .collect();
        entries.sort_by(|a, b| (&a.sku, &a.location).cmp(&(&b.sku, &b.location)));
        entries
    }

    /// 在持有鎖的情況下讀取分帳記錄與投影
    pub(crate) fn with_locked<R>(&self, key: &StockKey, f: impl FnOnce(&LedgerEntry) -> R) -> Option<R> {
        let row = self.existing_row(key)?;
        let entry = row.lock();
        if Self::is_untouched(&entry) {
            return None;
        }
        Some(f(&entry))
    }

    pub fn projection(&self) -> ProjectionView {
        self.sync.projection()
    }

    pub fn dirty_keys(&self) -> Vec<StockKey> {
        self.sync.dirty_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::FlakyStore;
    use proptest::prelude::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn ledger() -> AllocationLedger {
        AllocationLedger::in_memory(SyncRetryPolicy::new(1, 0))
    }

    fn amount(ledger: &AllocationLedger, key: &StockKey) -> Decimal {
        ledger.projection().amount(key).unwrap()
    }

    #[rstest]
    fn test_allocate_syncs_projection(ledger: AllocationLedger) {
        let key = StockKey::new("A1", "L1");
        ledger.allocate(&key, &BatchId::new("B1"), Decimal::from(50)).unwrap();

        assert_eq!(amount(&ledger, &key), Decimal::from(50));
    }

    #[rstest]
    fn test_deallocate_partial(ledger: AllocationLedger) {
        let key = StockKey::new("A1", "L1");
        ledger.allocate(&key, &BatchId::new("B1"), Decimal::from(30)).unwrap();
        ledger.allocate(&key, &BatchId::new("B2"), Decimal::from(20)).unwrap();

        let entry = ledger.deallocate(&key, &BatchId::new("B1"), Decimal::from(10)).unwrap();
        assert_eq!(entry.total_allocated(), Decimal::from(40));
        assert_eq!(amount(&ledger, &key), Decimal::from(40));
    }

    #[rstest]
    fn test_deallocate_unknown_row(ledger: AllocationLedger) {
        let key = StockKey::new("A1", "L9");
        let err = ledger
            .deallocate(&key, &BatchId::new("B1"), Decimal::from(1))
            .unwrap_err();

        assert!(matches!(err, AllocError::InsufficientAllocation { .. }));
        assert!(ledger.get(&key).is_none());
    }

    #[rstest]
    fn test_move_stock(ledger: AllocationLedger) {
        let b1 = BatchId::new("B1");
        let from = StockKey::new("A1", "L2");
        let to = StockKey::new("A1", "L1");
        ledger.allocate(&from, &b1, Decimal::from(10)).unwrap();

        let (from_entry, to_entry) = ledger
            .move_stock("A1", "L2", "L1", &b1, Decimal::from(4))
            .unwrap();
        assert_eq!(from_entry.total_allocated(), Decimal::from(6));
        assert_eq!(to_entry.total_allocated(), Decimal::from(4));
        assert_eq!(amount(&ledger, &from), Decimal::from(6));
        assert_eq!(amount(&ledger, &to), Decimal::from(4));

        // 超量移動不產生任何變更
        assert!(ledger.move_stock("A1", "L2", "L1", &b1, Decimal::from(7)).is_err());
        assert_eq!(amount(&ledger, &from), Decimal::from(6));
        assert_eq!(amount(&ledger, &to), Decimal::from(4));
    }

    #[rstest]
    fn test_failed_move_creates_no_destination(ledger: AllocationLedger) {
        let b1 = BatchId::new("B1");
        let dest = StockKey::new("A1", "L9");
        ledger.allocate(&StockKey::new("A1", "L1"), &b1, Decimal::from(2)).unwrap();

        assert!(matches!(
            ledger.move_stock("A1", "L1", "L9", &b1, Decimal::from(3)),
            Err(AllocError::InsufficientAllocation { .. })
        ));
        assert!(ledger.get(&dest).is_none());
        assert!(!ledger.keys().contains(&dest));
        assert!(ledger.rows_for_sku("A1").iter().all(|e| e.location != "L9"));
        assert!(matches!(ledger.sync_projection(&dest), Err(AllocError::LedgerNotFound(_))));
        assert_eq!(ledger.reconcile().unwrap().checked, 1);
    }

    #[rstest]
    fn test_move_to_same_location(ledger: AllocationLedger) {
        let b1 = BatchId::new("B1");
        let key = StockKey::new("A1", "L1");
        ledger.allocate(&key, &b1, Decimal::from(3)).unwrap();

        ledger.move_stock("A1", "L1", "L1", &b1, Decimal::from(3)).unwrap();
        assert_eq!(ledger.get(&key).unwrap().allocated_to(&b1), Decimal::from(3));
        assert!(ledger.move_stock("A1", "L1", "L1", &b1, Decimal::from(4)).is_err());
    }

    #[rstest]
    fn test_consume_up_to(ledger: AllocationLedger) {
        let b1 = BatchId::new("B1");
        let key = StockKey::new("A1", "L1");
        ledger.allocate(&key, &b1, Decimal::from(5)).unwrap();

        let consumed = ledger.consume_up_to(&key, &b1, Decimal::from(8));
        assert_eq!(consumed.quantity, Decimal::from(5));
        assert!(consumed.sync_error.is_none());
        assert_eq!(amount(&ledger, &key), Decimal::ZERO);

        let consumed = ledger.consume_up_to(&key, &b1, Decimal::from(8));
        assert_eq!(consumed.quantity, Decimal::ZERO);
    }

    #[rstest]
    #[case(DeletionPolicy::ReleaseToUnassigned, 15)]
    #[case(DeletionPolicy::Discard, 5)]
    fn test_release_batch(ledger: AllocationLedger, #[case] policy: DeletionPolicy, #[case] expected: i64) {
        let b1 = BatchId::new("B1");
        let key = StockKey::new("A1", "L1");
        ledger.allocate(&key, &b1, Decimal::from(10)).unwrap();
        ledger.allocate(&key, &BatchId::unassigned(), Decimal::from(5)).unwrap();

        let outcome = ledger.release_batch(&b1, policy);
        assert_eq!(outcome.total_released(), Decimal::from(10));
        assert!(outcome.stale.is_empty());
        assert_eq!(amount(&ledger, &key), Decimal::from(expected));
        assert!(ledger.keys_holding(&b1).is_empty());
    }

    #[test]
    fn test_sync_failure_keeps_ledger_change() {
        let store = Arc::new(FlakyStore::new(1));
        let ledger = AllocationLedger::new(store.clone(), SyncRetryPolicy::new(1, 0));
        let key = StockKey::new("A1", "L1");

        let err = ledger
            .allocate(&key, &BatchId::new("B1"), Decimal::from(9))
            .unwrap_err();
        assert!(matches!(err, AllocError::SyncFailure { .. }));
        assert_eq!(ledger.get(&key).unwrap().total_allocated(), Decimal::from(9));
        assert_eq!(ledger.dirty_keys(), vec![key.clone()]);

        let projection = ledger.sync_projection(&key).unwrap();
        assert_eq!(projection.amount, Decimal::from(9));
        assert!(ledger.dirty_keys().is_empty());
    }

    #[rstest]
    fn test_sync_unknown_key(ledger: AllocationLedger) {
        assert!(matches!(
            ledger.sync_projection(&StockKey::new("X", "Y")),
            Err(AllocError::LedgerNotFound(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate(usize, usize, u32),
        Deallocate(usize, usize, u32),
        Move(usize, usize, u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 0..3usize, 1..50u32).prop_map(|(l, b, q)| Op::Allocate(l, b, q)),
            (0..3usize, 0..3usize, 1..50u32).prop_map(|(l, b, q)| Op::Deallocate(l, b, q)),
            (0..3usize, 0..3usize, 1..50u32).prop_map(|(l, b, q)| Op::Move(l, b, q)),
        ]
    }

    const LOCATIONS: [&str; 3] = ["L1", "L2", "L3"];
    const BATCHES: [&str; 3] = ["B1", "B2", "UNASSIGNED"];

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// 任意操作序列後，每個庫存鍵的投影都等於分帳加總
        #[test]
        fn projection_matches_ledger(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let ledger = AllocationLedger::in_memory(SyncRetryPolicy::new(1, 0));

            for op in ops {
                // 失敗的操作不應留下任何部分變更
                let _ = match op {
                    Op::Allocate(l, b, q) => ledger
                        .allocate(&StockKey::new("A1", LOCATIONS[l]), &BatchId::new(BATCHES[b]), Decimal::from(q))
                        .map(|_| ()),
                    Op::Deallocate(l, b, q) => ledger
                        .deallocate(&StockKey::new("A1", LOCATIONS[l]), &BatchId::new(BATCHES[b]), Decimal::from(q))
                        .map(|_| ()),
                    Op::Move(l, b, q) => ledger
                        .move_stock("A1", LOCATIONS[l], LOCATIONS[(l + 1) % 3], &BatchId::new(BATCHES[b]), Decimal::from(q))
                        .map(|_| ()),
                };
            }

            for entry in ledger.snapshot() {
                prop_assert!(entry.is_consistent());
                prop_assert_eq!(
                    ledger.projection().amount(&entry.key()).unwrap(),
                    entry.allocations().values().copied().sum::<Decimal>()
                );
            }
        }

        /// 兩次同步之間沒有變更時，投影內容不變
        #[test]
        fn sync_is_idempotent(qty in 1..1_000u32) {
            let ledger = AllocationLedger::in_memory(SyncRetryPolicy::new(1, 0));
            let key = StockKey::new("A1", "L1");
            ledger.allocate(&key, &BatchId::new("B1"), Decimal::from(qty)).unwrap();

            let first = ledger.sync_projection(&key).unwrap();
            let second = ledger.sync_projection(&key).unwrap();
            prop_assert_eq!(first.amount, second.amount);
            prop_assert_eq!(first.key(), second.key());
        }

        /// 分配後再釋放同樣數量，總量回到原值
        #[test]
        fn allocate_then_deallocate_conserves(initial in 0..500u32, qty in 1..500u32) {
            let ledger = AllocationLedger::in_memory(SyncRetryPolicy::new(1, 0));
            let key = StockKey::new("A1", "L1");
            let b1 = BatchId::new("B1");
            if initial > 0 {
                ledger.allocate(&key, &BatchId::unassigned(), Decimal::from(initial)).unwrap();
            }
            let before = ledger.get(&key).map(|e| e.total_allocated()).unwrap_or(Decimal::ZERO);

            ledger.allocate(&key, &b1, Decimal::from(qty)).unwrap();
            let after = ledger.deallocate(&key, &b1, Decimal::from(qty)).unwrap();
            prop_assert_eq!(after.total_allocated(), before);
        }
    }
}
