//! 庫存投影儲存

use std::collections::HashMap;
use std::sync::Arc;

use alloc_core::{ProjectionEntry, Result, StockKey};
use dashmap::DashMap;
use rust_decimal::Decimal;

/// 投影儲存介面
///
/// 實際的持久化技術由外部提供；引擎只透過 [`crate::Synchronizer`] 寫入。
pub trait ProjectionStore: Send + Sync {
    /// 覆寫一筆投影
    fn write(&self, entry: ProjectionEntry) -> Result<()>;

    /// 讀取一筆投影
    fn read(&self, key: &StockKey) -> Result<Option<ProjectionEntry>>;

    /// 列出全部投影
    fn list(&self) -> Result<Vec<ProjectionEntry>>;
}

/// 記憶體投影儲存
#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    rows: DashMap<StockKey, ProjectionEntry>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn write(&self, entry: ProjectionEntry) -> Result<()> {
        self.rows.insert(entry.key(), entry);
        Ok(())
    }

    fn read(&self, key: &StockKey) -> Result<Option<ProjectionEntry>> {
        Ok(self.rows.get(key).map(|row| row.value().clone()))
    }

    fn list(&self) -> Result<Vec<ProjectionEntry>> {
        Ok(self.rows.iter().map(|row| row.value().clone()).collect())
    }
}

/// 投影唯讀視圖
#[derive(Clone)]
pub struct ProjectionView {
    store: Arc<dyn ProjectionStore>,
}

impl ProjectionView {
    pub(crate) fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &StockKey) -> Result<Option<ProjectionEntry>> {
        self.store.read(key)
    }

    /// 某庫存鍵的數量，沒有投影時為 0
    pub fn amount(&self, key: &StockKey) -> Result<Decimal> {
        Ok(self
            .store
            .read(key)?
            .map(|entry| entry.amount)
            .unwrap_or(Decimal::ZERO))
    }

    /// 全部投影（依庫存鍵排序）
    pub fn list(&self) -> Result<Vec<ProjectionEntry>> {
        let mut rows = self.store.list()?;
        rows.sort_by(|a, b| (&a.sku, &a.location).cmp(&(&b.sku, &b.location)));
        Ok(rows)
    }

    /// 依物料彙總所有儲位的數量
    pub fn aggregate_by_sku(&self) -> Result<HashMap<String, Decimal>> {
        let mut totals: HashMap<String, Decimal> = HashMap::new();
        for entry in self.store.list()? {
            *totals.entry(entry.sku).or_insert(Decimal::ZERO) += entry.amount;
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn projection(sku: &str, location: &str, amount: i64) -> ProjectionEntry {
        ProjectionEntry {
            sku: sku.to_string(),
            location: location.to_string(),
            amount: Decimal::from(amount),
            last_synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_aggregate_by_sku() {
        let store = Arc::new(InMemoryProjectionStore::new());
        store.write(projection("A1", "L1", 20)).unwrap();
        store.write(projection("A1", "L2", 15)).unwrap();
        store.write(projection("C1", "L1", 7)).unwrap();
        store.write(projection("A1", "L1", 25)).unwrap();

        let view = ProjectionView::new(store);
        let totals = view.aggregate_by_sku().unwrap();
        assert_eq!(totals["A1"], Decimal::from(40));
        assert_eq!(totals["C1"], Decimal::from(7));
        assert_eq!(view.amount(&StockKey::new("Z9", "L1")).unwrap(), Decimal::ZERO);
        assert_eq!(view.list().unwrap().len(), 3);
    }
}
