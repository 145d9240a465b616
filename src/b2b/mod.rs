//! B2B fulfilment: one tax invoice per recorded business purchase.
//!
//! The invoice's inc-VAT total must equal the recorded amount exactly.
//! The subtotal is backed out of the gross amount at scale 2, then a
//! greedy fill over inspected non-excise lots is closed to the exact
//! cent by a bounded search over final-line quantities and unit swaps.
//! Purchases that cannot be matched are deferred with a reason.

use chrono::NaiveDate;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::GeneratorConfig;
use crate::core::{
    calendar, money, Buyer, Classification, Customer, Invoice, InvoiceKind, InvoiceLine,
    QuarterTarget,
};
use crate::inventory::Inventory;
use crate::report::RunStats;
use crate::simulate::sample_business_hour;

/// Cap on cumulative B2B subtotal relative to the quarter's ex-VAT
/// target; keeps a strict quarter reachable from above.
const OVERSHOOT_GUARD_RATIO: Decimal = dec!(0.95);

/// Units the closure search may shave off one planned line. Wide
/// enough to walk a full residue class of any catalog price in cents.
const MAX_REDUCTION_PER_LINE: u32 = 5_000;

/// Work bound for the closure search of one purchase.
const MAX_SEARCH_STEPS: u32 = 2_000_000;

/// A purchase that could not be fulfilled, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredPurchase {
    pub customer: Customer,
    pub reason: String,
    /// True when the overshoot guard cut the purchase (by design);
    /// false for stock shortfalls, which strict quarters surface as
    /// alignment failures.
    pub by_guard: bool,
}

/// Result of the B2B phase for one quarter.
#[derive(Debug, Clone, Default)]
pub struct B2bOutcome {
    pub invoices: Vec<Invoice>,
    pub deferred: Vec<DeferredPurchase>,
}

/// Sellable inspected-non-excise lot snapshot, FIFO-ordered, with the
/// price in cents.
#[derive(Debug, Clone)]
struct LotSnapshot {
    lot_id: String,
    price_cents: i64,
    stock: u32,
}

fn eligible_lots(inventory: &Inventory, as_of: NaiveDate) -> Vec<LotSnapshot> {
    let mut lots: Vec<&crate::core::Lot> = inventory
        .available_lots(as_of, Some(Classification::NonExciseInspection))
        .into_iter()
        .collect();
    lots.sort_by(|a, b| {
        (a.stock_date, a.import_date, &a.lot_id).cmp(&(b.stock_date, b.import_date, &b.lot_id))
    });
    lots.into_iter()
        .filter_map(|lot| {
            money::to_cents(lot.unit_price_ex_vat).map(|price_cents| LotSnapshot {
                lot_id: lot.lot_id.clone(),
                price_cents,
                stock: lot.qty_remaining,
            })
        })
        .filter(|s| s.price_cents > 0)
        .collect()
}

/// Plan `(lot index, qty)` pairs whose subtotal hits `target_cents`
/// exactly, or `None` when the search space is exhausted.
fn plan_exact(lots: &[LotSnapshot], target_cents: i64) -> Option<Vec<(usize, u32)>> {
    let mut plan: Vec<(usize, u32)> = Vec::new();
    let mut used = vec![false; lots.len()];
    let mut remaining = target_cents;

    // Greedy FIFO fill.
    for (idx, lot) in lots.iter().enumerate() {
        if remaining < lot.price_cents {
            continue;
        }
        let by_amount = (remaining / lot.price_cents) as u32;
        let qty = by_amount.min(lot.stock);
        if qty == 0 {
            continue;
        }
        plan.push((idx, qty));
        used[idx] = true;
        remaining -= qty as i64 * lot.price_cents;
        if remaining == 0 {
            return Some(plan);
        }
    }

    let mut steps = 0u32;

    // Top up an already-planned line whose price divides the residue.
    let top_up = plan.iter().enumerate().find_map(|(pos, (idx, qty))| {
        let lot = &lots[*idx];
        if remaining % lot.price_cents != 0 {
            return None;
        }
        let extra = (remaining / lot.price_cents) as u32;
        (extra >= 1 && qty + extra <= lot.stock).then_some((pos, extra))
    });
    if let Some((pos, extra)) = top_up {
        plan[pos].1 += extra;
        return Some(plan);
    }

    // Add one fresh lot whose price divides the residue.
    for (idx, lot) in lots.iter().enumerate() {
        if used[idx] || remaining < lot.price_cents {
            continue;
        }
        if remaining % lot.price_cents == 0 {
            let qty = (remaining / lot.price_cents) as u32;
            if qty >= 1 && qty <= lot.stock {
                plan.push((idx, qty));
                return Some(plan);
            }
        }
    }

    // Shave units off a planned line, then close with a fresh lot.
    for plan_idx in 0..plan.len() {
        let (lot_idx, planned_qty) = plan[plan_idx];
        let price = lots[lot_idx].price_cents;
        let max_cut = planned_qty.min(MAX_REDUCTION_PER_LINE);
        for cut in 1..=max_cut {
            let residue = remaining + cut as i64 * price;
            for (idx, lot) in lots.iter().enumerate() {
                steps += 1;
                if steps > MAX_SEARCH_STEPS {
                    return None;
                }
                if used[idx] || residue < lot.price_cents {
                    continue;
                }
                if residue % lot.price_cents == 0 {
                    let qty = (residue / lot.price_cents) as u32;
                    if qty >= 1 && qty <= lot.stock {
                        let mut closed = plan.clone();
                        closed[plan_idx].1 = planned_qty - cut;
                        closed.retain(|(_, q)| *q > 0);
                        closed.push((idx, qty));
                        return Some(closed);
                    }
                }
            }
        }
    }

    None
}

fn fulfil_purchase(
    inventory: &mut Inventory,
    rng: &mut ChaCha8Rng,
    config: &GeneratorConfig,
    customer: &Customer,
) -> Result<Invoice, String> {
    let subtotals = money::exact_net_from_gross(customer.amount_inc_vat, config.vat_rate);
    if subtotals.is_empty() {
        return Err(format!(
            "no scale-2 subtotal reconciles to {} at rate {}",
            customer.amount_inc_vat, config.vat_rate
        ));
    }

    let lots = eligible_lots(inventory, customer.purchase_date);
    if lots.is_empty() {
        return Err("no inspected stock available on the purchase date".into());
    }

    for subtotal in &subtotals {
        let Some(target_cents) = money::to_cents(*subtotal) else {
            continue;
        };
        if let Some(plan) = plan_exact(&lots, target_cents) {
            let mut lines = Vec::with_capacity(plan.len());
            for (idx, qty) in plan {
                let lot_id = &lots[idx].lot_id;
                // Planned within the availability snapshot; cannot fail.
                inventory
                    .deduct(lot_id, qty)
                    .map_err(|err| err.to_string())?;
                let lot = inventory
                    .lot(lot_id)
                    .ok_or_else(|| format!("lot {lot_id} vanished during fulfilment"))?;
                lines.push(InvoiceLine::new(lot, qty));
            }
            let (hour, minute) = sample_business_hour(rng);
            let invoice = Invoice::new(
                InvoiceKind::Tax,
                calendar::datetime_at(customer.purchase_date, hour, minute),
                Buyer::from_customer(customer),
                lines,
                config.vat_rate,
            );
            debug_assert_eq!(invoice.total, customer.amount_inc_vat);
            return Ok(invoice);
        }
    }

    Err("insufficient inspected stock to match the purchase amount exactly".into())
}

/// Fulfil every purchase of the quarter, applying the overshoot guard
/// first. Purchases are processed in read order; one tax invoice each.
pub fn fulfil_quarter(
    inventory: &mut Inventory,
    rng: &mut ChaCha8Rng,
    config: &GeneratorConfig,
    quarter: &QuarterTarget,
    customers: &[Customer],
    stats: &mut RunStats,
) -> B2bOutcome {
    let mut outcome = B2bOutcome::default();

    let total_inc: Decimal = customers.iter().map(|c| c.amount_inc_vat).sum();
    let guard_cap = quarter.sales_ex_vat * OVERSHOOT_GUARD_RATIO;
    let mut kept: Vec<&Customer> = Vec::with_capacity(customers.len());

    if total_inc > quarter.sales_inc_vat {
        // Deterministically keep the largest read-order prefix whose
        // cumulative subtotal stays under the guard cap; everything
        // after the first violation is deferred.
        let mut cumulative = Decimal::ZERO;
        let mut prefix_closed = false;
        for customer in customers {
            let subtotal = money::net_from_gross(customer.amount_inc_vat, config.vat_rate);
            if prefix_closed || cumulative + subtotal > guard_cap {
                prefix_closed = true;
                warn!(
                    customer = %customer.name,
                    quarter = %quarter.label,
                    "purchase deferred by overshoot guard"
                );
                stats.b2b_deferred += 1;
                outcome.deferred.push(DeferredPurchase {
                    customer: customer.clone(),
                    reason: format!(
                        "overshoot guard: cumulative B2B subtotal would exceed {guard_cap}"
                    ),
                    by_guard: true,
                });
                continue;
            }
            cumulative += subtotal;
            kept.push(customer);
        }
    } else {
        kept.extend(customers.iter());
    }

    for customer in kept {
        match fulfil_purchase(inventory, rng, config, customer) {
            Ok(invoice) => outcome.invoices.push(invoice),
            Err(reason) => {
                warn!(customer = %customer.name, %reason, "B2B purchase deferred");
                stats.b2b_deferred += 1;
                outcome.deferred.push(DeferredPurchase {
                    customer: customer.clone(),
                    reason,
                    by_guard: false,
                });
            }
        }
    }

    outcome
}
