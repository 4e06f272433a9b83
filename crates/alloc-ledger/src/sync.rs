//! 投影同步
//!
//! 投影的唯一寫入者。每次分帳變更後，在持有該庫存鍵鎖的情況下，
//! 以分帳記錄重新折疊出投影並覆寫。

use std::sync::Arc;

use alloc_core::{AllocError, LedgerEntry, ProjectionEntry, Result, StockKey, SyncRetryPolicy};
use chrono::Utc;
use parking_lot::Mutex;

use crate::dirty_tracking::DirtyTracker;
use crate::projection::{ProjectionStore, ProjectionView};

/// 投影同步器
pub struct Synchronizer {
    store: Arc<dyn ProjectionStore>,
    policy: SyncRetryPolicy,
    dirty: Mutex<DirtyTracker>,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn ProjectionStore>, policy: SyncRetryPolicy) -> Self {
        Self {
            store,
            policy,
            dirty: Mutex::new(DirtyTracker::new()),
        }
    }

    /// 依分帳記錄重建投影
    ///
    /// 呼叫端必須持有 `entry` 所屬庫存鍵的鎖。寫入失敗時依策略重試；
    /// 重試用盡後標記為髒並返回 `SyncFailure`。
    pub(crate) fn sync_entry(&self, entry: &LedgerEntry) -> Result<ProjectionEntry> {
        let key = entry.key();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let projection = ProjectionEntry::fold(entry, Utc::now());

            match self.store.write(projection.clone()) {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!("投影同步 {} 在第 {} 次嘗試成功", key, attempt);
                    }
                    self.dirty.lock().clear_key(&key);
                    tracing::debug!("投影同步 {} = {}", key, projection.amount);
                    return Ok(projection);
                }
                Err(err) if attempt < max_attempts => {
                    tracing::warn!("投影同步 {} 第 {} 次失敗: {}", key, attempt, err);
                    std::thread::sleep(self.policy.backoff(attempt));
                }
                Err(err) => {
                    self.dirty.lock().mark_dirty(key.clone());
                    tracing::error!(
                        "投影同步 {} 重試 {} 次後失敗，投影與分帳不一致: {}",
                        key,
                        attempt,
                        err
                    );
                    return Err(AllocError::SyncFailure {
                        key,
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    /// 投影已知過期的庫存鍵
    pub fn dirty_keys(&self) -> Vec<StockKey> {
        self.dirty.lock().get_dirty_keys()
    }

    pub fn is_dirty(&self, key: &StockKey) -> bool {
        self.dirty.lock().is_dirty(key)
    }

    pub fn projection(&self) -> ProjectionView {
        ProjectionView::new(Arc::clone(&self.store))
    }
}
