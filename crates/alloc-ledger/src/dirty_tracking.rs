//! 髒標記追蹤（投影已知過期的庫存鍵）

use std::collections::HashSet;

use alloc_core::StockKey;

/// 髒標記追蹤器
#[derive(Debug)]
pub struct DirtyTracker {
    dirty_keys: HashSet<StockKey>,
}

impl DirtyTracker {
    /// 創建新的追蹤器
    pub fn new() -> Self {
        Self {
            dirty_keys: HashSet::new(),
        }
    }

    /// 標記庫存鍵為髒
    pub fn mark_dirty(&mut self, key: StockKey) {
        self.dirty_keys.insert(key);
    }

    /// 清除單一庫存鍵的髒標記
    pub fn clear_key(&mut self, key: &StockKey) {
        self.dirty_keys.remove(key);
    }

    /// 檢查庫存鍵是否為髒
    pub fn is_dirty(&self, key: &StockKey) -> bool {
        self.dirty_keys.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_keys.is_empty()
    }

    /// 獲取所有髒庫存鍵（已排序）
    pub fn get_dirty_keys(&self) -> Vec<StockKey> {
        let mut keys: Vec<StockKey> = self.dirty_keys.iter().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for DirtyTracker {
    fn default() -> Self {
        Self::new()
    }
}
