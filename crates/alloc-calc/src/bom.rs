//! 物料清單解析

use std::collections::HashMap;

use alloc_core::{AllocError, ComponentLine, Result};

/// 物料清單解析介面
///
/// 依 (區域, 產品類型) 返回有序的物料清單，只有耗用紀錄會使用。
pub trait BomResolver: Send + Sync {
    fn resolve(&self, zone: &str, product_type: &str) -> Result<Vec<ComponentLine>>;
}

/// 靜態物料清單表
#[derive(Debug, Default, Clone)]
pub struct StaticBomResolver {
    boms: HashMap<(String, String), Vec<ComponentLine>>,
}

impl StaticBomResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：加入物料清單
    pub fn with_bom(
        mut self,
        zone: impl Into<String>,
        product_type: impl Into<String>,
        components: Vec<ComponentLine>,
    ) -> Self {
        self.boms.insert((zone.into(), product_type.into()), components);
        self
    }
}

impl BomResolver for StaticBomResolver {
    fn resolve(&self, zone: &str, product_type: &str) -> Result<Vec<ComponentLine>> {
        self.boms
            .get(&(zone.to_string(), product_type.to_string()))
            .cloned()
            .ok_or_else(|| AllocError::BomNotFound {
                zone: zone.to_string(),
                product_type: product_type.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_static_resolver() {
        let resolver = StaticBomResolver::new().with_bom(
            "Z1",
            "CABINET",
            vec![
                ComponentLine::new("HINGE", Decimal::from(4)),
                ComponentLine::new("PANEL", Decimal::from(2)),
            ],
        );

        let components = resolver.resolve("Z1", "CABINET").unwrap();
        assert_eq!(components[0].sku, "HINGE");
        assert!(matches!(
            resolver.resolve("Z2", "CABINET"),
            Err(AllocError::BomNotFound { .. })
        ));
    }
}
