//! 分配引擎配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AllocError, Result};

/// 分配引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 投影同步重試策略
    pub sync_retry: SyncRetryPolicy,

    /// 耗用時搜尋儲位的順序
    pub location_order: LocationOrder,

    /// 耗用可以從哪些分配桶扣除
    pub consumption_source: ConsumptionSource,

    /// 刪除批次時釋放數量的處理方式
    pub deletion_policy: DeletionPolicy,

    /// 缺料批次是否仍在模擬中保留可得的庫存
    /// - false: 缺料批次不保留任何庫存，低優先批次可使用（預設）
    /// - true: 缺料批次保留 min(可用, 剩餘需求)
    pub reserve_partial_demand: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_retry: SyncRetryPolicy::default(),
            location_order: LocationOrder::Lexicographic,
            consumption_source: ConsumptionSource::OwnThenUnassigned,
            deletion_policy: DeletionPolicy::ReleaseToUnassigned,
            reserve_partial_demand: false,
        }
    }
}

impl EngineConfig {
    /// 從 JSON 載入配置，未提供的欄位使用預設值
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AllocError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 檢查配置是否合法
    pub fn validate(&self) -> Result<()> {
        if self.sync_retry.max_attempts == 0 {
            return Err(AllocError::Config(
                "sync_retry.max_attempts 至少為 1".to_string(),
            ));
        }
        Ok(())
    }

    /// 建構器模式：設置同步重試策略
    pub fn with_sync_retry(mut self, policy: SyncRetryPolicy) -> Self {
        self.sync_retry = policy;
        self
    }

    /// 建構器模式：設置儲位搜尋順序
    pub fn with_location_order(mut self, order: LocationOrder) -> Self {
        self.location_order = order;
        self
    }

    /// 建構器模式：設置耗用來源
    pub fn with_consumption_source(mut self, source: ConsumptionSource) -> Self {
        self.consumption_source = source;
        self
    }

    /// 建構器模式：設置刪除策略
    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    /// 建構器模式：設置缺料批次是否保留庫存
    pub fn with_reserve_partial_demand(mut self, reserve: bool) -> Self {
        self.reserve_partial_demand = reserve;
        self
    }
}

/// 投影同步重試策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRetryPolicy {
    /// 最多嘗試次數（含第一次）
    pub max_attempts: u32,

    /// 線性退避間隔（毫秒），第 n 次重試前等待 n * backoff_ms
    pub backoff_ms: u64,
}

impl Default for SyncRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 10,
        }
    }
}

impl SyncRetryPolicy {
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms,
        }
    }

    /// 第 `attempt` 次失敗後的等待時間
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// 耗用時的儲位搜尋順序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationOrder {
    /// 依儲位名稱排序
    Lexicographic,
    /// 分配量大的儲位優先（減少拆分）
    LargestFirst,
    /// 分配量小的儲位優先（優先清空零散儲位）
    SmallestFirst,
}

/// 耗用來源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumptionSource {
    /// 先扣批次自己的分配，不足時再扣未分配庫存
    OwnThenUnassigned,
    /// 只扣批次自己的分配
    OwnOnly,
}

/// 批次刪除時的釋放策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    /// 釋放的數量轉回未分配
    ReleaseToUnassigned,
    /// 釋放的數量直接歸零
    Discard,
}
