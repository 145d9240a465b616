//! Lot-addressed FIFO inventory with time-gated activation.
//!
//! Lots are keyed by `customs_declaration_no:item_description` and keep
//! their own frozen price and cost. Deductions are transactional: a
//! failed multi-lot deduction leaves every lot untouched.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::GeneratorConfig;
use crate::core::{lot_key, CatalogRow, Classification, DaftarError, Lot};

/// One `(lot, quantity)` slice of a FIFO deduction, with the lot's
/// price/cost snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductionSlice {
    pub lot_id: String,
    pub qty: u32,
    pub unit_price_ex_vat: Decimal,
    pub unit_cost_ex_vat: Decimal,
}

/// The lot store. Owned exclusively by the aligner for the duration of
/// a run; every mutation is a local quantity update.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    lots: HashMap<String, Lot>,
    /// Load order; the deterministic iteration index.
    order: Vec<String>,
    /// Per-item lot ids, FIFO by (stock_date, import_date, lot_id).
    by_item: HashMap<String, Vec<String>>,
    /// Lots priced below cost: flagged at load, excluded from selection.
    unprofitable: BTreeSet<String>,
}

impl Inventory {
    /// Ingest pre-parsed catalog rows.
    ///
    /// Each lot draws its activation delay once, from
    /// `config.lot_activation_days`; lots imported on or before
    /// `zero_delay_on_or_before` skip the delay so the earliest quarter
    /// is not starved of sellable stock.
    pub fn load(
        rows: Vec<CatalogRow>,
        config: &GeneratorConfig,
        zero_delay_on_or_before: Option<NaiveDate>,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, DaftarError> {
        let (delay_min, delay_max) = config.lot_activation_days;
        let mut inventory = Self::default();

        for row in rows {
            if row.item_description.trim().is_empty() {
                return Err(DaftarError::InputShape(format!(
                    "declaration {}: empty item description",
                    row.customs_declaration_no
                )));
            }
            if row.qty_imported == 0 {
                return Err(DaftarError::InputShape(format!(
                    "lot {}: imported quantity is zero",
                    lot_key(&row.customs_declaration_no, &row.item_description)
                )));
            }
            if row.unit_price_ex_vat <= Decimal::ZERO || row.unit_cost_ex_vat < Decimal::ZERO {
                return Err(DaftarError::InputShape(format!(
                    "lot {}: non-positive price or negative cost",
                    lot_key(&row.customs_declaration_no, &row.item_description)
                )));
            }

            let lot_id = lot_key(&row.customs_declaration_no, &row.item_description);
            if inventory.lots.contains_key(&lot_id) {
                return Err(DaftarError::InputShape(format!(
                    "duplicate lot id: {lot_id}"
                )));
            }

            // One draw per lot, in load order, so the layout is a pure
            // function of catalog order and seed.
            let delay = rng.gen_range(delay_min..=delay_max);
            let skip_delay =
                zero_delay_on_or_before.is_some_and(|cutoff| row.import_date <= cutoff);
            let stock_date = if skip_delay {
                row.import_date
            } else {
                row.import_date + chrono::Duration::days(delay as i64)
            };

            let lot = Lot {
                lot_id: lot_id.clone(),
                customs_declaration_no: row.customs_declaration_no,
                item_description: row.item_description.clone(),
                classification: row.classification,
                import_date: row.import_date,
                stock_date,
                qty_imported: row.qty_imported,
                qty_remaining: row.qty_imported,
                unit_cost_ex_vat: row.unit_cost_ex_vat,
                unit_price_ex_vat: row.unit_price_ex_vat,
            };

            if !lot.is_profitable() {
                warn!(
                    lot = %lot_id,
                    price = %lot.unit_price_ex_vat,
                    cost = %lot.unit_cost_ex_vat,
                    "lot priced below cost; excluded from selection"
                );
                inventory.unprofitable.insert(lot_id.clone());
            }

            inventory
                .by_item
                .entry(row.item_description)
                .or_default()
                .push(lot_id.clone());
            inventory.order.push(lot_id.clone());
            inventory.lots.insert(lot_id, lot);
        }

        let lots = &inventory.lots;
        for ids in inventory.by_item.values_mut() {
            ids.sort_by_key(|id| {
                let lot = &lots[id];
                (lot.stock_date, lot.import_date, id.clone())
            });
        }

        Ok(inventory)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// O(1) lot lookup.
    pub fn lot(&self, lot_id: &str) -> Option<&Lot> {
        self.lots.get(lot_id)
    }

    /// All lots in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Lot> {
        self.order.iter().map(|id| &self.lots[id])
    }

    /// Lot ids flagged as priced below cost at load.
    pub fn unprofitable_lots(&self) -> impl Iterator<Item = &str> {
        self.unprofitable.iter().map(String::as_str)
    }

    /// All lots of one item, FIFO-ordered by stock date then import date.
    pub fn lots_for_item(&self, item_description: &str) -> Vec<&Lot> {
        self.by_item
            .get(item_description)
            .map(|ids| ids.iter().map(|id| &self.lots[id]).collect())
            .unwrap_or_default()
    }

    /// Lots sellable on `as_of` (active, stocked, not flagged), in load
    /// order, optionally filtered by classification.
    pub fn available_lots(
        &self,
        as_of: NaiveDate,
        classification: Option<Classification>,
    ) -> Vec<&Lot> {
        self.order
            .iter()
            .map(|id| &self.lots[id])
            .filter(|lot| lot.is_active(as_of))
            .filter(|lot| !self.unprofitable.contains(&lot.lot_id))
            .filter(|lot| classification.map_or(true, |c| lot.classification == c))
            .collect()
    }

    /// Aggregate sellable stock of one item on `as_of`.
    pub fn total_available(&self, item_description: &str, as_of: NaiveDate) -> u32 {
        self.lots_for_item(item_description)
            .into_iter()
            .filter(|lot| lot.is_active(as_of))
            .filter(|lot| !self.unprofitable.contains(&lot.lot_id))
            .map(|lot| lot.qty_remaining)
            .sum()
    }

    /// Decrement one lot's remaining quantity.
    pub fn deduct(&mut self, lot_id: &str, qty: u32) -> Result<(), DaftarError> {
        let lot = self
            .lots
            .get_mut(lot_id)
            .ok_or_else(|| DaftarError::UnknownLot(lot_id.to_string()))?;
        if qty > lot.qty_remaining {
            return Err(DaftarError::InsufficientStock {
                lot_id: lot_id.to_string(),
                requested: qty,
                available: lot.qty_remaining,
            });
        }
        lot.qty_remaining -= qty;
        Ok(())
    }

    /// Give quantity back to a lot (refinement decrements, dropped
    /// lines). Never exceeds the imported quantity.
    pub fn restore(&mut self, lot_id: &str, qty: u32) -> Result<(), DaftarError> {
        let lot = self
            .lots
            .get_mut(lot_id)
            .ok_or_else(|| DaftarError::UnknownLot(lot_id.to_string()))?;
        if lot.qty_remaining + qty > lot.qty_imported {
            return Err(DaftarError::InvariantViolation(format!(
                "restore would exceed imported quantity for lot {lot_id}: {} + {qty} > {}",
                lot.qty_remaining, lot.qty_imported
            )));
        }
        lot.qty_remaining += qty;
        Ok(())
    }

    /// Deduct `qty` units of an item across its lots in FIFO order.
    ///
    /// All-or-nothing: when the sellable aggregate is short the error
    /// carries the shortfall and no lot is touched.
    pub fn deduct_fifo(
        &mut self,
        item_description: &str,
        qty: u32,
        as_of: NaiveDate,
    ) -> Result<Vec<DeductionSlice>, DaftarError> {
        let mut plan: Vec<(String, u32)> = Vec::new();
        let mut remaining = qty;

        for lot in self.lots_for_item(item_description) {
            if remaining == 0 {
                break;
            }
            if !lot.is_active(as_of) || self.unprofitable.contains(&lot.lot_id) {
                continue;
            }
            let take = remaining.min(lot.qty_remaining);
            plan.push((lot.lot_id.clone(), take));
            remaining -= take;
        }

        if remaining > 0 {
            return Err(DaftarError::InsufficientStock {
                lot_id: item_description.to_string(),
                requested: qty,
                available: qty - remaining,
            });
        }

        let mut slices = Vec::with_capacity(plan.len());
        for (lot_id, take) in plan {
            // Planned within availability above; cannot fail.
            self.deduct(&lot_id, take)?;
            let lot = &self.lots[&lot_id];
            slices.push(DeductionSlice {
                lot_id,
                qty: take,
                unit_price_ex_vat: lot.unit_price_ex_vat,
                unit_cost_ex_vat: lot.unit_cost_ex_vat,
            });
        }
        Ok(slices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(decl: &str, item: &str, day: u32, qty: u32, cost: Decimal, price: Decimal) -> CatalogRow {
        CatalogRow {
            customs_declaration_no: decl.into(),
            item_description: item.into(),
            classification: Classification::NonExciseInspection,
            import_date: date(2024, 1, day),
            qty_imported: qty,
            unit_cost_ex_vat: cost,
            unit_price_ex_vat: price,
            margin_pct: None,
        }
    }

    fn load(rows: Vec<CatalogRow>) -> Inventory {
        let config = GeneratorConfig {
            lot_activation_days: (0, 0),
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        Inventory::load(rows, &config, None, &mut rng).unwrap()
    }

    #[test]
    fn fifo_order_by_stock_then_import() {
        let inv = load(vec![
            row("D-2", "tea", 10, 50, dec!(8.00), dec!(9.00)),
            row("D-1", "tea", 5, 50, dec!(8.00), dec!(9.00)),
        ]);
        let lots = inv.lots_for_item("tea");
        assert_eq!(lots[0].lot_id, "D-1:tea");
        assert_eq!(lots[1].lot_id, "D-2:tea");
    }

    #[test]
    fn activation_gates_availability() {
        let config = GeneratorConfig {
            lot_activation_days: (5, 5),
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let inv = Inventory::load(
            vec![row("D-1", "tea", 10, 50, dec!(8.00), dec!(9.00))],
            &config,
            None,
            &mut rng,
        )
        .unwrap();
        assert!(inv.available_lots(date(2024, 1, 12), None).is_empty());
        assert_eq!(inv.available_lots(date(2024, 1, 15), None).len(), 1);
    }

    #[test]
    fn starvation_override_skips_delay() {
        let config = GeneratorConfig {
            lot_activation_days: (12, 12),
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let inv = Inventory::load(
            vec![row("D-1", "tea", 10, 50, dec!(8.00), dec!(9.00))],
            &config,
            Some(date(2024, 3, 31)),
            &mut rng,
        )
        .unwrap();
        assert_eq!(inv.lot("D-1:tea").unwrap().stock_date, date(2024, 1, 10));
    }

    #[test]
    fn deduct_fifo_spans_lots() {
        let mut inv = load(vec![
            row("D-1", "tea", 5, 100, dec!(8.00), dec!(10.00)),
            row("D-2", "tea", 10, 100, dec!(9.00), dec!(12.00)),
        ]);
        let slices = inv.deduct_fifo("tea", 150, date(2024, 2, 1)).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!((slices[0].lot_id.as_str(), slices[0].qty), ("D-1:tea", 100));
        assert_eq!((slices[1].lot_id.as_str(), slices[1].qty), ("D-2:tea", 50));
        assert_eq!(inv.lot("D-1:tea").unwrap().qty_remaining, 0);
        assert_eq!(inv.lot("D-2:tea").unwrap().qty_remaining, 50);
    }

    #[test]
    fn deduct_fifo_is_all_or_nothing() {
        let mut inv = load(vec![
            row("D-1", "tea", 5, 100, dec!(8.00), dec!(10.00)),
            row("D-2", "tea", 10, 100, dec!(9.00), dec!(12.00)),
        ]);
        let err = inv.deduct_fifo("tea", 250, date(2024, 2, 1)).unwrap_err();
        assert!(matches!(err, DaftarError::InsufficientStock { .. }));
        assert_eq!(inv.lot("D-1:tea").unwrap().qty_remaining, 100);
        assert_eq!(inv.lot("D-2:tea").unwrap().qty_remaining, 100);
    }

    #[test]
    fn unprofitable_lots_are_excluded() {
        let mut inv = load(vec![
            row("D-1", "tea", 5, 100, dec!(11.00), dec!(10.00)), // below cost
            row("D-2", "tea", 10, 100, dec!(9.00), dec!(12.00)),
        ]);
        assert_eq!(inv.unprofitable_lots().collect::<Vec<_>>(), ["D-1:tea"]);
        assert_eq!(inv.available_lots(date(2024, 2, 1), None).len(), 1);
        assert_eq!(inv.total_available("tea", date(2024, 2, 1)), 100);
        // FIFO skips the flagged lot entirely.
        let slices = inv.deduct_fifo("tea", 50, date(2024, 2, 1)).unwrap();
        assert_eq!(slices[0].lot_id, "D-2:tea");
    }

    #[test]
    fn restore_is_bounded() {
        let mut inv = load(vec![row("D-1", "tea", 5, 100, dec!(8.00), dec!(10.00))]);
        inv.deduct("D-1:tea", 40).unwrap();
        inv.restore("D-1:tea", 40).unwrap();
        assert_eq!(inv.lot("D-1:tea").unwrap().qty_remaining, 100);
        assert!(inv.restore("D-1:tea", 1).is_err());
    }

    #[test]
    fn duplicate_lot_ids_rejected() {
        let config = GeneratorConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let rows = vec![
            row("D-1", "tea", 5, 100, dec!(8.00), dec!(10.00)),
            row("D-1", "tea", 6, 100, dec!(8.00), dec!(10.00)),
        ];
        assert!(matches!(
            Inventory::load(rows, &config, None, &mut rng),
            Err(DaftarError::InputShape(_))
        ));
    }
}
