//! Basket composition for a single invoice.
//!
//! Selects lots and quantities honouring the classification mixing
//! rules, stock, and profitability. The composer deducts stock as it
//! emits lines; a failed pick drops the lot from the pool and retries
//! within a bounded attempt budget.

use chrono::NaiveDate;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::{GeneratorConfig, PricingPolicy};
use crate::core::{money, Classification, DaftarError, InvoiceKind, InvoiceLine};
use crate::inventory::Inventory;
use crate::report::RunStats;

/// Bound on lot picks (including failed ones) for one basket.
const MAX_COMPOSE_ATTEMPTS: u32 = 50;

/// Stop adding lines once the running subtotal reaches this share of an
/// amount target; further lines would overshoot.
const AMOUNT_FILL_RATIO: Decimal = dec!(0.95);

/// Requested basket size: a line-count target or an ex-VAT subtotal
/// target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeHint {
    Lines(u32),
    Amount(Decimal),
}

/// A composed basket: the lines (stock already deducted) and their
/// exact subtotal for the caller to accumulate against the quarter gap.
#[derive(Debug, Clone, PartialEq)]
pub struct Basket {
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
}

/// Snapshot of a selectable lot; decouples selection from the borrow on
/// the inventory.
#[derive(Debug, Clone)]
struct Candidate {
    lot_id: String,
    price: Decimal,
    stock: u32,
}

fn pool(
    inventory: &Inventory,
    as_of: NaiveDate,
    classes: &[Classification],
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for class in classes {
        for lot in inventory.available_lots(as_of, Some(*class)) {
            out.push(Candidate {
                lot_id: lot.lot_id.clone(),
                price: lot.unit_price_ex_vat,
                stock: lot.qty_remaining,
            });
        }
    }
    out
}

/// Weighted pick without replacement: heavier-stocked lots are chosen
/// more often, draining the inventory evenly. Removes and returns the
/// picked candidate.
fn pick_weighted(pool: &mut Vec<Candidate>, rng: &mut ChaCha8Rng) -> Option<Candidate> {
    let total: u64 = pool.iter().map(|c| c.stock as u64).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.gen_range(0..total);
    for idx in 0..pool.len() {
        let weight = pool[idx].stock as u64;
        if roll < weight {
            return Some(pool.remove(idx));
        }
        roll -= weight;
    }
    None
}

/// Compose a basket for one invoice.
///
/// Returns `None` when no eligible stock exists or the attempt budget
/// runs out before a single line is emitted; the caller counts the
/// abandonment and moves on.
pub fn compose(
    inventory: &mut Inventory,
    rng: &mut ChaCha8Rng,
    config: &GeneratorConfig,
    kind: InvoiceKind,
    as_of: NaiveDate,
    hint: SizeHint,
    stats: &mut RunStats,
) -> Option<Basket> {
    if kind == InvoiceKind::Simplified && rng.gen_bool(config.excise_exclusive_ratio) {
        if let Some(basket) = compose_excise(inventory, rng, config, as_of, hint) {
            return Some(basket);
        }
        // No excise stock today; fall through to a regular cash basket.
    }

    let classes: &[Classification] = match kind {
        InvoiceKind::Tax => &[Classification::NonExciseInspection],
        InvoiceKind::Simplified => &[
            Classification::NonExciseInspection,
            Classification::NonExciseOutside,
        ],
    };
    let mut pool = pool(inventory, as_of, classes);
    if pool.is_empty() {
        stats.baskets_abandoned += 1;
        return None;
    }

    let (line_min, line_max) = config.line_items_per_invoice;
    let (qty_min, qty_max) = config.quantity_per_line;
    let line_target = match hint {
        SizeHint::Lines(n) => n.clamp(line_min, line_max),
        SizeHint::Amount(_) => rng.gen_range(line_min..=line_max),
    };

    let mut lines: Vec<InvoiceLine> = Vec::new();
    let mut subtotal = Decimal::ZERO;
    let mut attempts = 0u32;

    while (lines.len() as u32) < line_target && attempts < MAX_COMPOSE_ATTEMPTS {
        attempts += 1;
        let Some(candidate) = pick_weighted(&mut pool, rng) else {
            break;
        };

        let qty = match hint {
            SizeHint::Lines(_) => rng.gen_range(qty_min..=qty_max),
            SizeHint::Amount(target) => {
                let remaining = target - subtotal;
                if remaining <= Decimal::ZERO {
                    break;
                }
                let ideal = (remaining / candidate.price)
                    .floor()
                    .to_u32()
                    .unwrap_or(u32::MAX);
                if ideal < qty_min {
                    if lines.is_empty() {
                        // A first line is mandatory even when it overshoots.
                        qty_min
                    } else {
                        stats.composer_retries += 1;
                        continue;
                    }
                } else {
                    ideal.min(qty_max)
                }
            }
        };
        let qty = qty.min(candidate.stock);
        if qty < qty_min {
            stats.composer_retries += 1;
            continue;
        }

        if let Err(err) = inventory.deduct(&candidate.lot_id, qty) {
            debug!(lot = %candidate.lot_id, %err, "deduction failed; dropping lot from pool");
            stats.insufficient_stock_events += 1;
            stats.composer_retries += 1;
            continue;
        }
        let lot = inventory.lot(&candidate.lot_id)?;
        let line = InvoiceLine::new(lot, qty);
        subtotal += line.line_subtotal;
        lines.push(line);

        if let SizeHint::Amount(target) = hint {
            if subtotal >= target * AMOUNT_FILL_RATIO {
                break;
            }
        }
    }

    if lines.is_empty() {
        stats.baskets_abandoned += 1;
        return None;
    }
    Some(Basket { lines, subtotal })
}

/// Single-line excise basket. Excise lots never share an invoice.
fn compose_excise(
    inventory: &mut Inventory,
    rng: &mut ChaCha8Rng,
    config: &GeneratorConfig,
    as_of: NaiveDate,
    hint: SizeHint,
) -> Option<Basket> {
    let (qty_min, qty_max) = config.quantity_per_line;
    let mut candidates = pool(inventory, as_of, &[Classification::ExciseInspection]);
    candidates.retain(|c| c.stock >= qty_min);
    let candidate = pick_weighted(&mut candidates, rng)?;

    let qty = match hint {
        SizeHint::Lines(_) => rng.gen_range(qty_min..=qty_max),
        SizeHint::Amount(target) => (target / candidate.price)
            .floor()
            .to_u32()
            .unwrap_or(qty_min)
            .clamp(qty_min, qty_max),
    };
    let qty = qty.min(candidate.stock);

    inventory.deduct(&candidate.lot_id, qty).ok()?;
    let lot = inventory.lot(&candidate.lot_id)?;
    let line = InvoiceLine::new(lot, qty);
    let subtotal = line.line_subtotal;
    Some(Basket {
        lines: vec![line],
        subtotal,
    })
}

/// Turn an `(item, quantity)` demand into lines, one per FIFO lot slice.
///
/// Under the default per-lot pricing every slice keeps its own price;
/// the weighted-average policy blends the slices into a single line at
/// the quantity-weighted price (explicitly opted into, and not covered
/// by the price-fidelity validator).
pub fn lines_for_item_quantity(
    inventory: &mut Inventory,
    item_description: &str,
    qty: u32,
    as_of: NaiveDate,
    policy: PricingPolicy,
) -> Result<Vec<InvoiceLine>, DaftarError> {
    let slices = inventory.deduct_fifo(item_description, qty, as_of)?;
    if slices.is_empty() {
        return Ok(Vec::new());
    }

    match policy {
        PricingPolicy::LotPrice => Ok(slices
            .iter()
            .map(|slice| {
                let lot = inventory
                    .lot(&slice.lot_id)
                    .ok_or_else(|| DaftarError::UnknownLot(slice.lot_id.clone()))?;
                Ok(InvoiceLine::new(lot, slice.qty))
            })
            .collect::<Result<Vec<_>, DaftarError>>()?),
        PricingPolicy::WeightedAverage => {
            let total_qty: u32 = slices.iter().map(|s| s.qty).sum();
            let value: Decimal = slices
                .iter()
                .map(|s| s.unit_price_ex_vat * Decimal::from(s.qty))
                .sum();
            let cost: Decimal = slices
                .iter()
                .map(|s| s.unit_cost_ex_vat * Decimal::from(s.qty))
                .sum();
            let first = &slices[0];
            let lot = inventory
                .lot(&first.lot_id)
                .ok_or_else(|| DaftarError::UnknownLot(first.lot_id.clone()))?;
            let blended_price = money::round_half_up(value / Decimal::from(total_qty));
            let blended_cost = money::round_half_up(cost / Decimal::from(total_qty));
            Ok(vec![InvoiceLine {
                lot_id: first.lot_id.clone(),
                item_description: lot.item_description.clone(),
                classification: lot.classification,
                quantity: total_qty,
                unit_price_ex_vat: blended_price,
                unit_cost_ex_vat: blended_cost,
                line_subtotal: money::line_subtotal(blended_price, total_qty),
            }])
        }
    }
}
