//! 分帳與投影的一致性檢查

use alloc_core::{Result, StockKey};
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::AllocationLedger;

/// 投影與分帳不一致的記錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionMismatch {
    pub key: StockKey,
    pub ledger_total: Decimal,

    /// None 表示沒有投影記錄
    pub projected: Option<Decimal>,
}

/// 一致性檢查結果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// 檢查的庫存鍵數量
    pub checked: usize,
    pub mismatches: Vec<ProjectionMismatch>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl AllocationLedger {
    /// 檢查每個庫存鍵的投影是否等於分帳加總
    ///
    /// 每個庫存鍵在自己的鎖內比對，多個庫存鍵並行檢查。
    pub fn reconcile(&self) -> Result<ReconciliationReport> {
        let keys = self.keys();
        let projection = self.projection();

        let checked: Vec<Option<ProjectionMismatch>> = keys
            .par_iter()
            .map(|key| {
                let compared = self.with_locked(key, |entry| -> Result<Option<ProjectionMismatch>> {
                    let ledger_total: Decimal = entry.allocations().values().copied().sum();
                    let projected = projection.get(key)?.map(|p| p.amount);
                    let consistent = match projected {
                        Some(amount) => amount == ledger_total,
                        None => ledger_total.is_zero(),
                    };
                    Ok((!consistent).then(|| ProjectionMismatch {
                        key: key.clone(),
                        ledger_total,
                        projected,
                    }))
                });
                compared.unwrap_or(Ok(None))
            })
            .collect::<Result<Vec<_>>>()?;

        let mismatches: Vec<ProjectionMismatch> = checked.into_iter().flatten().collect();
        for mismatch in &mismatches {
            tracing::error!(
                "投影不一致 {}: 分帳 {}，投影 {:?}",
                mismatch.key,
                mismatch.ledger_total,
                mismatch.projected
            );
        }
        tracing::info!(
            "一致性檢查完成：{} 個庫存鍵，{} 個不一致",
            keys.len(),
            mismatches.len()
        );

        Ok(ReconciliationReport {
            checked: keys.len(),
            mismatches,
        })
    }

    /// 重新同步所有髒標記與不一致的庫存鍵，返回修復後的檢查結果
    pub fn repair(&self) -> Result<ReconciliationReport> {
        let mut keys = self.dirty_keys();
        keys.extend(self.reconcile()?.mismatches.into_iter().map(|m| m.key));
        keys.sort();
        keys.dedup();

        for key in &keys {
            self.sync_projection(key)?;
        }
        if !keys.is_empty() {
            tracing::info!("已重新同步 {} 個庫存鍵", keys.len());
        }

        self.reconcile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::FlakyStore;
    use alloc_core::{BatchId, SyncRetryPolicy};
    use std::sync::Arc;

    #[test]
    fn test_reconcile_clean_ledger() {
        let ledger = AllocationLedger::in_memory(SyncRetryPolicy::default());
        ledger
            .allocate(&StockKey::new("A1", "L1"), &BatchId::new("B1"), Decimal::from(5))
            .unwrap();
        ledger
            .allocate(&StockKey::new("A1", "L2"), &BatchId::unassigned(), Decimal::from(7))
            .unwrap();

        let report = ledger.reconcile().unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_repair_after_sync_failure() {
        let store = Arc::new(FlakyStore::new(1));
        let ledger = AllocationLedger::new(store, SyncRetryPolicy::new(1, 0));
        let key = StockKey::new("A1", "L1");

        assert!(ledger.allocate(&key, &BatchId::new("B1"), Decimal::from(5)).is_err());

        let report = ledger.reconcile().unwrap();
        assert_eq!(
            report.mismatches,
            vec![ProjectionMismatch {
                key: key.clone(),
                ledger_total: Decimal::from(5),
                projected: None,
            }]
        );

        let repaired = ledger.repair().unwrap();
        assert!(repaired.is_consistent());
        assert!(ledger.dirty_keys().is_empty());
    }
}
