//! 批次物料需求模型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::BatchId;

/// 批次需求（每個批次、每個物料一筆）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// 批次編號
    pub batch_id: BatchId,

    /// 物料編號
    pub sku: String,

    /// 總需求量
    pub total_needed: Decimal,

    /// 已耗用量（只增不減）
    pub consumed: Decimal,

    /// 剩餘需求量（不為負）
    pub remaining: Decimal,
}

impl Requirement {
    /// 創建新的需求（尚未耗用）
    pub fn new(batch_id: BatchId, sku: impl Into<String>, total_needed: Decimal) -> Self {
        Self {
            batch_id,
            sku: sku.into(),
            total_needed,
            consumed: Decimal::ZERO,
            remaining: total_needed.max(Decimal::ZERO),
        }
    }

    /// 記錄耗用，返回超出剩餘需求的數量
    pub fn record_consumption(&mut self, quantity: Decimal) -> Decimal {
        let quantity = quantity.max(Decimal::ZERO);
        let excess = (quantity - self.remaining).max(Decimal::ZERO);
        self.consumed += quantity;
        self.remaining = (self.remaining - quantity).max(Decimal::ZERO);
        excess
    }

    pub fn is_satisfied(&self) -> bool {
        self.remaining.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_consumption() {
        let mut req = Requirement::new(BatchId::new("B1"), "A001", Decimal::from(50));

        assert_eq!(req.record_consumption(Decimal::from(20)), Decimal::ZERO);
        assert_eq!(req.consumed, Decimal::from(20));
        assert_eq!(req.remaining, Decimal::from(30));
        assert!(!req.is_satisfied());
    }

    #[test]
    fn test_over_consumption_clamps_remaining() {
        let mut req = Requirement::new(BatchId::new("B1"), "A001", Decimal::from(10));
        req.record_consumption(Decimal::from(8));

        let excess = req.record_consumption(Decimal::from(5));
        assert_eq!(excess, Decimal::from(3));
        assert_eq!(req.remaining, Decimal::ZERO);
        assert_eq!(req.consumed, Decimal::from(13));
        assert!(req.is_satisfied());
    }
}
