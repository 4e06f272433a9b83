//! 優先序分配模擬
//!
//! 依優先序逐一走訪生產中的批次，對彙總庫存快照做虛擬扣除，
//! 計算每個批次的可生產單位數與缺料。結果只代表快照當下，不是保留。

use std::collections::HashMap;

use alloc_core::{Batch, HealthReport, HealthStatus, Requirement, Shortage};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// 優先序分配模擬器（無狀態）
pub struct PriorityAllocationSimulator;

impl PriorityAllocationSimulator {
    /// 執行模擬
    ///
    /// # 參數
    /// * `batches` - 生產中的批次，會依 `priority_rank` 由小到大處理
    /// * `requirements` - 每個批次的需求
    /// * `stock` - 依物料彙總（跨儲位）的庫存快照
    /// * `reserve_partial_demand` - 缺料批次是否仍扣除可得的庫存
    ///   - false: 只有完全可滿足的批次才扣除需求（預設）
    ///   - true: 缺料批次扣除 min(可用, 剩餘需求)
    pub fn simulate(
        batches: &[Batch],
        requirements: &HashMap<alloc_core::BatchId, Vec<Requirement>>,
        stock: &HashMap<String, Decimal>,
        reserve_partial_demand: bool,
        as_of: DateTime<Utc>,
    ) -> Vec<HealthReport> {
        let mut ordered: Vec<&Batch> = batches.iter().filter(|b| b.is_active()).collect();
        ordered.sort_by(|a, b| {
            a.priority_rank
                .unwrap_or(u64::MAX)
                .cmp(&b.priority_rank.unwrap_or(u64::MAX))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut remaining_stock = stock.clone();
        let mut reports = Vec::with_capacity(ordered.len());
        let empty = Vec::new();

        for batch in ordered {
            let batch_requirements = requirements.get(&batch.id).unwrap_or(&empty);
            let report = Self::evaluate_batch(
                batch,
                batch_requirements,
                &mut remaining_stock,
                reserve_partial_demand,
                as_of,
            );

            tracing::debug!(
                "批次 {} (優先序 {:?}): {:?}，可生產 {}/{}，缺料 {} 項",
                batch.id,
                batch.priority_rank,
                report.status,
                report.units_producible,
                report.units_left,
                report.shortages.len()
            );
            reports.push(report);
        }

        reports
    }

    /// floor(available / (remaining / units_left))
    ///
    /// 先乘後除避免循環小數誤差；乘法溢位時改為先算每單位需求。
    fn producible_units(available: Decimal, remaining: Decimal, units_left: u32) -> Decimal {
        let units_left = Decimal::from(units_left);
        let quotient = match available.checked_mul(units_left) {
            Some(scaled) => scaled.checked_div(remaining),
            None => remaining
                .checked_div(units_left)
                .and_then(|per_unit| available.checked_div(per_unit)),
        };
        quotient.map(|q| q.floor()).unwrap_or(Decimal::MAX)
    }

    /// 評估單一批次並在可滿足時扣除虛擬庫存
    fn evaluate_batch(
        batch: &Batch,
        requirements: &[Requirement],
        remaining_stock: &mut HashMap<String, Decimal>,
        reserve_partial_demand: bool,
        as_of: DateTime<Utc>,
    ) -> HealthReport {
        let units_left = batch.units_left();
        let open: Vec<&Requirement> = requirements
            .iter()
            .filter(|req| req.remaining > Decimal::ZERO)
            .collect();

        let mut shortages = Vec::new();
        let mut producible: Option<Decimal> = None;

        for req in &open {
            let available = remaining_stock
                .get(&req.sku)
                .copied()
                .unwrap_or(Decimal::ZERO)
                .max(Decimal::ZERO);

            if units_left > 0 {
                let units = Self::producible_units(available, req.remaining, units_left);
                producible = Some(producible.map_or(units, |p| p.min(units)));
            }

            if available < req.remaining {
                shortages.push(Shortage {
                    sku: req.sku.clone(),
                    needed: req.remaining,
                    available,
                    shortfall: req.remaining - available,
                });
            }
        }

        // 沒有未滿足的需求時可生產單位數不受物料限制，回報剩餘單位數
        let units_producible = producible
            .map(|p| p.max(Decimal::ZERO).to_u32().unwrap_or(u32::MAX))
            .unwrap_or(units_left);

        if shortages.is_empty() {
            for req in &open {
                *remaining_stock.entry(req.sku.clone()).or_insert(Decimal::ZERO) -= req.remaining;
            }
        } else if reserve_partial_demand {
            for req in &open {
                let slot = remaining_stock.entry(req.sku.clone()).or_insert(Decimal::ZERO);
                let reserved = (*slot).max(Decimal::ZERO).min(req.remaining);
                *slot -= reserved;
            }
        }

        let status = if shortages.is_empty() {
            HealthStatus::Healthy
        } else if units_producible > 0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        };

        HealthReport {
            batch_id: batch.id.clone(),
            priority_rank: batch.priority_rank,
            status,
            units_left,
            units_producible,
            shortages,
            as_of,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc_core::{BatchId, ComponentLine};
    use rstest::rstest;

    fn active_batch(id: &str, rank: u64, total_units: u32, components: Vec<ComponentLine>) -> Batch {
        let mut batch = Batch::new(id, total_units, components);
        batch.activate(rank).unwrap();
        batch
    }

    fn requirements_of(batches: &[Batch]) -> HashMap<BatchId, Vec<Requirement>> {
        batches
            .iter()
            .map(|b| {
                let reqs = b
                    .components
                    .iter()
                    .map(|c| {
                        Requirement::new(b.id.clone(), c.sku.clone(), c.qty_per_unit * Decimal::from(b.total_units))
                    })
                    .collect();
                (b.id.clone(), reqs)
            })
            .collect()
    }

    fn stock(entries: &[(&str, i64)]) -> HashMap<String, Decimal> {
        entries
            .iter()
            .map(|(sku, qty)| (sku.to_string(), Decimal::from(*qty)))
            .collect()
    }

    #[test]
    fn test_partial_producibility_is_warning() {
        // 需求 50，3 單位，庫存 30 → 每單位 16.67，可生產 1
        let batch = active_batch("604", 1, 3, Vec::new());
        let mut requirements = HashMap::new();
        requirements.insert(
            batch.id.clone(),
            vec![Requirement::new(batch.id.clone(), "A001", Decimal::from(50))],
        );

        let reports = PriorityAllocationSimulator::simulate(
            &[batch],
            &requirements,
            &stock(&[("A001", 30)]),
            false,
            Utc::now(),
        );

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, HealthStatus::Warning);
        assert_eq!(reports[0].units_producible, 1);
        assert_eq!(
            reports[0].shortages,
            vec![Shortage {
                sku: "A001".to_string(),
                needed: Decimal::from(50),
                available: Decimal::from(30),
                shortfall: Decimal::from(20),
            }]
        );
    }

    #[test]
    fn test_higher_priority_consumes_contested_stock() {
        let batches = vec![
            active_batch("LOW", 2, 1, vec![ComponentLine::new("C1", Decimal::from(10))]),
            active_batch("HIGH", 1, 1, vec![ComponentLine::new("C1", Decimal::from(10))]),
        ];
        let reports = PriorityAllocationSimulator::simulate(
            &batches,
            &requirements_of(&batches),
            &stock(&[("C1", 10)]),
            false,
            Utc::now(),
        );

        assert_eq!(reports[0].batch_id, BatchId::new("HIGH"));
        assert_eq!(reports[0].status, HealthStatus::Healthy);
        assert_eq!(reports[1].batch_id, BatchId::new("LOW"));
        assert_eq!(reports[1].status, HealthStatus::Critical);
        assert_eq!(reports[1].units_producible, 0);
        assert_eq!(reports[1].shortages[0].available, Decimal::ZERO);
    }

    #[rstest]
    #[case(false, HealthStatus::Healthy)]
    #[case(true, HealthStatus::Critical)]
    fn test_shortfall_batch_reservation(#[case] reserve: bool, #[case] expected: HealthStatus) {
        // 高優先批次需要 20 但只有 15，低優先批次需要 15
        let batches = vec![
            active_batch("A", 1, 2, vec![ComponentLine::new("C1", Decimal::from(10))]),
            active_batch("B", 2, 1, vec![ComponentLine::new("C1", Decimal::from(15))]),
        ];
        let reports = PriorityAllocationSimulator::simulate(
            &batches,
            &requirements_of(&batches),
            &stock(&[("C1", 15)]),
            reserve,
            Utc::now(),
        );

        assert_eq!(reports[0].status, HealthStatus::Warning);
        assert_eq!(reports[0].units_producible, 1);
        assert_eq!(reports[1].status, expected);
    }

    #[test]
    fn test_batch_without_open_requirements_is_healthy() {
        let batch = active_batch("B1", 1, 4, Vec::new());
        let reports = PriorityAllocationSimulator::simulate(
            &[batch],
            &HashMap::new(),
            &HashMap::new(),
            false,
            Utc::now(),
        );

        assert_eq!(reports[0].status, HealthStatus::Healthy);
        assert_eq!(reports[0].units_producible, 4);
    }

    #[test]
    fn test_producible_reflects_stock_beyond_units_left() {
        let batches = vec![active_batch("B1", 1, 2, vec![ComponentLine::new("C1", Decimal::ONE)])];
        let reports = PriorityAllocationSimulator::simulate(
            &batches,
            &requirements_of(&batches),
            &stock(&[("C1", 1_000)]),
            false,
            Utc::now(),
        );

        assert_eq!(reports[0].status, HealthStatus::Healthy);
        assert_eq!(reports[0].units_producible, 1_000);
        assert_eq!(reports[0].units_left, 2);
    }

    #[test]
    fn test_large_stock_does_not_overflow() {
        // 1e25 × 100000 超出 Decimal 範圍
        let big = Decimal::from_i128_with_scale(10_i128.pow(25), 0);
        let batches = vec![active_batch("B1", 1, 100_000, vec![ComponentLine::new("C1", Decimal::ONE)])];
        let mut stock = HashMap::new();
        stock.insert("C1".to_string(), big);

        let reports = PriorityAllocationSimulator::simulate(
            &batches,
            &requirements_of(&batches),
            &stock,
            false,
            Utc::now(),
        );

        assert_eq!(reports[0].status, HealthStatus::Healthy);
        assert_eq!(reports[0].units_producible, u32::MAX);
    }

    #[test]
    fn test_producible_uses_minimum_across_components() {
        // 2/3 這類循環小數不應造成少算
        let batches = vec![active_batch(
            "B1",
            1,
            3,
            vec![
                ComponentLine::new("C1", Decimal::new(2, 0) / Decimal::from(3)),
                ComponentLine::new("C2", Decimal::from(4)),
            ],
        )];
        let mut requirements = HashMap::new();
        requirements.insert(
            BatchId::new("B1"),
            vec![
                Requirement::new(BatchId::new("B1"), "C1", Decimal::from(2)),
                Requirement::new(BatchId::new("B1"), "C2", Decimal::from(12)),
            ],
        );
        let reports = PriorityAllocationSimulator::simulate(
            &batches,
            &requirements,
            &stock(&[("C1", 2), ("C2", 9)]),
            false,
            Utc::now(),
        );

        assert_eq!(reports[0].status, HealthStatus::Warning);
        assert_eq!(reports[0].units_producible, 2);
        assert_eq!(reports[0].shortages.len(), 1);
        assert_eq!(reports[0].shortages[0].sku, "C2");
    }

    #[test]
    fn test_inactive_batches_are_skipped() {
        let planning = Batch::new("P1", 1, vec![ComponentLine::new("C1", Decimal::ONE)]);
        let reports = PriorityAllocationSimulator::simulate(
            &[planning],
            &HashMap::new(),
            &HashMap::new(),
            false,
            Utc::now(),
        );
        assert!(reports.is_empty());
    }
}
