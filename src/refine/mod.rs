//! Post-generation refinement: ±1 quantity adjustments that close the
//! residual between the generated invoices and the quarter target.
//!
//! A coarse pass walks the residual inside the coarse tolerance with
//! single ±1 moves (increments on peak days, decrements on slow days).
//! For strict quarters a fine pass then chases the strict tolerance,
//! adding paired +1/−1 swaps across two invoices whose net effect is a
//! few cents. Every move keeps the ledger invariants: no line below
//! quantity 1 (the line is dropped instead, and never the last line of
//! an invoice), no lot over-drawn or over-restored, classification
//! untouched.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::core::{money, Invoice};
use crate::inventory::Inventory;
use crate::simulate::is_peak_day;

/// Cap on candidate lines per direction in the fine pass's swap search.
const MAX_SWAP_CANDIDATES: usize = 500;

/// Result of a refinement run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineOutcome {
    pub iterations: u32,
    pub adjustments: u32,
    /// `target − Σ totals` after refinement.
    pub residual: Decimal,
}

/// A single ±1 move on one line of one invoice.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Move {
    invoice: usize,
    line: usize,
    delta: i32,
    /// Exact change to that invoice's inc-VAT total.
    effect: Decimal,
}

fn ledger_sum(invoices: &[Invoice]) -> Decimal {
    invoices.iter().map(|i| i.total).sum()
}

/// Inc-VAT total of `invoice` after changing one line's quantity by
/// `delta`, without mutating anything. `None` when the move is invalid.
fn adjusted_total(invoice: &Invoice, line_idx: usize, delta: i32, vat_rate: Decimal) -> Option<Decimal> {
    let line = invoice.lines.get(line_idx)?;
    let new_qty = line.quantity as i64 + delta as i64;
    if new_qty < 0 {
        return None;
    }
    if new_qty == 0 && invoice.lines.len() == 1 {
        // Never empty an invoice.
        return None;
    }
    let new_line_subtotal = if new_qty == 0 {
        Decimal::ZERO
    } else {
        money::line_subtotal(line.unit_price_ex_vat, new_qty as u32)
    };
    let new_subtotal = invoice.subtotal - line.line_subtotal + new_line_subtotal;
    let new_vat = money::vat_of(new_subtotal, vat_rate);
    Some(new_subtotal + new_vat)
}

fn make_move(
    invoices: &[Invoice],
    invoice_idx: usize,
    line_idx: usize,
    delta: i32,
    vat_rate: Decimal,
) -> Option<Move> {
    let invoice = &invoices[invoice_idx];
    let new_total = adjusted_total(invoice, line_idx, delta, vat_rate)?;
    Some(Move {
        invoice: invoice_idx,
        line: line_idx,
        delta,
        effect: new_total - invoice.total,
    })
}

/// Largest-line +1 candidates. Peak-day invoices first; when a quarter
/// has no adjustable peak-day invoice the rest are allowed so the pass
/// still converges.
fn increment_candidates(
    invoices: &[Invoice],
    inventory: &Inventory,
    period_end: NaiveDate,
    vat_rate: Decimal,
    all_lines: bool,
) -> Vec<Move> {
    let mut peak = Vec::new();
    let mut rest = Vec::new();
    for (inv_idx, invoice) in invoices.iter().enumerate() {
        let line_range: Vec<usize> = if all_lines {
            (0..invoice.lines.len()).collect()
        } else {
            // Coarse pass: only the invoice's largest line absorbs the unit.
            invoice
                .lines
                .iter()
                .enumerate()
                .max_by_key(|(idx, l)| (l.line_subtotal, std::cmp::Reverse(*idx)))
                .map(|(idx, _)| vec![idx])
                .unwrap_or_default()
        };
        for line_idx in line_range {
            let line = &invoice.lines[line_idx];
            let has_stock = inventory
                .lot(&line.lot_id)
                .map_or(false, |lot| lot.qty_remaining > 0);
            if !has_stock {
                continue;
            }
            if let Some(mv) = make_move(invoices, inv_idx, line_idx, 1, vat_rate) {
                if is_peak_day(invoice.issue_date(), period_end) {
                    peak.push(mv);
                } else {
                    rest.push(mv);
                }
            }
        }
    }
    if peak.is_empty() {
        rest
    } else {
        peak
    }
}

/// −1 candidates on lines that can give a unit back. Slow-day invoices
/// first, mirroring the increment side.
fn decrement_candidates(
    invoices: &[Invoice],
    period_end: NaiveDate,
    vat_rate: Decimal,
) -> Vec<Move> {
    let mut slow = Vec::new();
    let mut rest = Vec::new();
    for (inv_idx, invoice) in invoices.iter().enumerate() {
        for line_idx in 0..invoice.lines.len() {
            if let Some(mv) = make_move(invoices, inv_idx, line_idx, -1, vat_rate) {
                if is_peak_day(invoice.issue_date(), period_end) {
                    rest.push(mv);
                } else {
                    slow.push(mv);
                }
            }
        }
    }
    if slow.is_empty() {
        rest
    } else {
        slow
    }
}

/// Apply one move, keeping the inventory in step with the ledger.
fn apply_move(
    invoices: &mut [Invoice],
    inventory: &mut Inventory,
    mv: Move,
    vat_rate: Decimal,
) -> bool {
    let invoice = &mut invoices[mv.invoice];
    let line = &mut invoice.lines[mv.line];
    let lot_id = line.lot_id.clone();

    if mv.delta > 0 {
        if inventory.deduct(&lot_id, 1).is_err() {
            return false;
        }
        line.quantity += 1;
        line.recompute_subtotal();
    } else {
        if inventory.restore(&lot_id, 1).is_err() {
            return false;
        }
        if line.quantity > 1 {
            line.quantity -= 1;
            line.recompute_subtotal();
        } else {
            invoice.lines.remove(mv.line);
        }
    }
    invoice.recompute_totals(vat_rate);
    true
}

fn best_single(candidates: &[Move], delta: Decimal) -> Option<Move> {
    candidates
        .iter()
        .copied()
        .min_by_key(|mv| ((delta - mv.effect).abs(), mv.invoice, mv.line))
}

/// Best +1/−1 pair across two different invoices. Effects add exactly
/// because each invoice's VAT is recomputed independently.
fn best_pair(incs: &[Move], decs: &[Move], delta: Decimal) -> Option<(Move, Move)> {
    let incs = &incs[..incs.len().min(MAX_SWAP_CANDIDATES)];
    let mut decs: Vec<Move> = decs[..decs.len().min(MAX_SWAP_CANDIDATES)].to_vec();
    decs.sort_by_key(|mv| (mv.effect, mv.invoice, mv.line));

    let mut best: Option<((Move, Move), Decimal)> = None;
    for inc in incs {
        let wanted = delta - inc.effect;
        let split = decs.partition_point(|mv| mv.effect < wanted);
        // The closest dec effects bracket the insertion point; invoices
        // must differ so the combined effect stays exact.
        let lo = split.saturating_sub(4);
        let hi = (split + 4).min(decs.len());
        for dec in &decs[lo..hi] {
            if dec.invoice == inc.invoice {
                continue;
            }
            let residual = (delta - inc.effect - dec.effect).abs();
            let better = match &best {
                None => true,
                Some((_, best_residual)) => residual < *best_residual,
            };
            if better {
                best = Some(((*inc, *dec), residual));
            }
        }
    }
    best.map(|(pair, _)| pair)
}

fn run_pass(
    invoices: &mut [Invoice],
    inventory: &mut Inventory,
    config: &GeneratorConfig,
    target_inc: Decimal,
    period_end: NaiveDate,
    tolerance: Decimal,
    with_swaps: bool,
) -> (u32, u32) {
    let vat_rate = config.vat_rate;
    let mut iterations = 0u32;
    let mut adjustments = 0u32;

    while iterations < config.refine_max_iterations {
        let delta = target_inc - ledger_sum(invoices);
        if delta.abs() <= tolerance {
            break;
        }
        iterations += 1;

        let incs = increment_candidates(invoices, inventory, period_end, vat_rate, with_swaps);
        let decs = decrement_candidates(invoices, period_end, vat_rate);

        let single = if delta > Decimal::ZERO {
            best_single(&incs, delta)
        } else {
            best_single(&decs, delta)
        };
        let single_residual = single.map(|mv| (delta - mv.effect).abs());

        let pair = if with_swaps {
            best_pair(&incs, &decs, delta)
        } else {
            None
        };
        let pair_residual = pair.map(|(a, b)| (delta - a.effect - b.effect).abs());

        enum Choice {
            Single(Move),
            Pair(Move, Move),
        }
        let choice = match (single, pair) {
            (Some(s), Some(p)) => {
                // Both exist; residuals are Some by construction.
                if pair_residual < single_residual {
                    Choice::Pair(p.0, p.1)
                } else {
                    Choice::Single(s)
                }
            }
            (Some(s), None) => Choice::Single(s),
            (None, Some(p)) => Choice::Pair(p.0, p.1),
            (None, None) => break,
        };

        let new_residual = match &choice {
            Choice::Single(_) => single_residual,
            Choice::Pair(..) => pair_residual,
        };
        // Greedy on magnitude: stop when no move shrinks the residual.
        if new_residual.map_or(true, |r| r >= delta.abs()) {
            break;
        }

        match choice {
            Choice::Single(mv) => {
                if apply_move(invoices, inventory, mv, vat_rate) {
                    adjustments += 1;
                }
            }
            Choice::Pair(inc, dec) => {
                if apply_move(invoices, inventory, inc, vat_rate) {
                    adjustments += 1;
                }
                if apply_move(invoices, inventory, dec, vat_rate) {
                    adjustments += 1;
                }
            }
        }
    }

    (iterations, adjustments)
}

/// Refine the quarter's invoices toward `target_inc`.
///
/// The coarse pass runs for every quarter; the fine swap pass only for
/// strict quarters, chasing the strict tolerance.
pub fn refine_to_target(
    invoices: &mut [Invoice],
    inventory: &mut Inventory,
    config: &GeneratorConfig,
    target_inc: Decimal,
    period_end: NaiveDate,
    strict: bool,
) -> RefineOutcome {
    let (coarse_iter, coarse_adj) = run_pass(
        invoices,
        inventory,
        config,
        target_inc,
        period_end,
        config.refine_tolerance_coarse,
        false,
    );

    let (fine_iter, fine_adj) = if strict {
        run_pass(
            invoices,
            inventory,
            config,
            target_inc,
            period_end,
            config.alignment_strict_tolerance,
            true,
        )
    } else {
        (0, 0)
    };

    let residual = target_inc - ledger_sum(invoices);
    debug!(%residual, iterations = coarse_iter + fine_iter, "refinement finished");
    RefineOutcome {
        iterations: coarse_iter + fine_iter,
        adjustments: coarse_adj + fine_adj,
        residual,
    }
}
