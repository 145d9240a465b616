//! Quarterly alignment: the two-phase orchestration that bends the
//! generated stream toward the declared totals.
//!
//! Per quarter: fixed-amount B2B invoices first, then cash invoices for
//! the remaining gap under the strict/loose stopping tiers, then the
//! refinement pass, then a reported balancing invoice when a strict
//! quarter still misses. Sequence numbers are assigned at the end of
//! the run in one deterministic traversal. The aligner owns the
//! inventory, the seeded generator and the sequence counters; given the
//! same inputs and seed, two runs produce byte-identical ledgers.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::b2b::{self, DeferredPurchase};
use crate::config::GeneratorConfig;
use crate::core::calendar::HolidayCalendar;
use crate::core::{
    calendar, money, Buyer, CatalogRow, Customer, DaftarError, Holiday, Invoice,
    InvoiceKind, InvoiceLine, InvoiceNumberSequence, QuarterTarget,
};
use crate::inventory::Inventory;
use crate::refine;
use crate::report::{QuarterSummary, RunStats};
use crate::simulate::{self, CashPhaseParams};
use crate::validate;

/// Non-strict quarters may overshoot the target up to this ratio.
const LOOSE_HARD_CAP_RATIO: Decimal = dec!(1.10);

/// Non-strict quarters stop once generation reaches this share of the
/// target…
const LOOSE_ACCEPT_RATIO: Decimal = dec!(0.95);

/// …provided the remaining gap is inside this many currency units.
const LOOSE_STOP_WITHIN: Decimal = dec!(5000);

/// Everything a finished run hands to writers and callers.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The full ledger, chronological, numbered.
    pub invoices: Vec<Invoice>,
    pub quarters: Vec<QuarterSummary>,
    pub deferred: Vec<DeferredPurchase>,
    pub stats: RunStats,
    pub findings: Vec<crate::core::ValidationFinding>,
    /// True when a critical invariant failed post-run.
    pub failed: bool,
    /// Final inventory state, for stock reporting.
    pub inventory: Inventory,
}

struct QuarterResult {
    invoices: Vec<Invoice>,
    deferred: Vec<DeferredPurchase>,
    converged: bool,
    balancing_used: bool,
    target_inc: Decimal,
}

/// The full synthesis: load, align each quarter, number, validate.
pub fn generate_ledger(
    catalog: Vec<CatalogRow>,
    customers: Vec<Customer>,
    holidays: Vec<Holiday>,
    mut quarters: Vec<QuarterTarget>,
    config: GeneratorConfig,
) -> Result<RunOutcome, DaftarError> {
    config.validate()?;
    if quarters.is_empty() {
        return Err(DaftarError::InputShape("no quarter targets given".into()));
    }

    quarters.sort_by_key(|q| q.period_start);
    for quarter in &quarters {
        quarter.validate(config.vat_rate)?;
    }

    let holiday_calendar = HolidayCalendar::new(holidays);
    let mut rng = ChaCha8Rng::seed_from_u64(config.random_seed);

    // Lots imported during the earliest quarter activate immediately so
    // the starved first period has anything to sell.
    let earliest_cutoff = quarters.first().map(|q| q.period_end);
    let mut inventory = Inventory::load(catalog, &config, earliest_cutoff, &mut rng)?;

    let mut stats = RunStats::default();
    stats.profitability_skips = inventory.unprofitable_lots().count() as u64;

    let mut all_invoices: Vec<Invoice> = Vec::new();
    let mut summaries: Vec<QuarterSummary> = Vec::new();
    let mut all_deferred: Vec<DeferredPurchase> = Vec::new();

    for quarter in &quarters {
        let in_quarter: Vec<Customer> = customers
            .iter()
            .filter(|c| quarter.contains(c.purchase_date))
            .cloned()
            .collect();

        let result = align_quarter(
            &mut inventory,
            &mut rng,
            &config,
            quarter,
            &in_quarter,
            &holiday_calendar,
            &mut stats,
        );

        summaries.push(summarize(quarter, &result));
        all_deferred.extend(result.deferred);
        all_invoices.extend(result.invoices);
    }

    // Chronological emission order; intra-day order is emission order,
    // which the stable sort preserves.
    all_invoices.sort_by_key(|i| i.issue_date());
    assign_numbers(&mut all_invoices, &config);

    let mut findings = validate::run_all(
        &all_invoices,
        &inventory,
        &holiday_calendar,
        &quarters,
        &config,
    );
    // A stock-shortfall deferral inside a strict quarter is an
    // alignment failure; guard deferrals are by design.
    for deferred in &all_deferred {
        let in_strict = quarters
            .iter()
            .any(|q| q.strict && q.contains(deferred.customer.purchase_date));
        if in_strict && !deferred.by_guard {
            findings.push(crate::core::ValidationFinding::critical(
                "b2b-fulfilment",
                format!(
                    "strict-quarter purchase by {} deferred: {}",
                    deferred.customer.name, deferred.reason
                ),
            ));
        }
    }
    let failed = findings
        .iter()
        .any(|f| f.severity == crate::core::Severity::Critical);
    if failed {
        warn!("run failed post-run validation");
    }

    Ok(RunOutcome {
        invoices: all_invoices,
        quarters: summaries,
        deferred: all_deferred,
        stats,
        findings,
        failed,
        inventory,
    })
}

fn summarize(quarter: &QuarterTarget, result: &QuarterResult) -> QuarterSummary {
    let actual_ex: Decimal = result.invoices.iter().map(|i| i.subtotal).sum();
    let actual_vat: Decimal = result.invoices.iter().map(|i| i.vat_amount).sum();
    let actual_inc: Decimal = result.invoices.iter().map(|i| i.total).sum();
    let simplified = result
        .invoices
        .iter()
        .filter(|i| i.kind == InvoiceKind::Simplified)
        .count();
    let coverage = if result.target_inc.is_zero() {
        1.0
    } else {
        use rust_decimal::prelude::ToPrimitive;
        (actual_inc / result.target_inc).to_f64().unwrap_or(0.0)
    };
    QuarterSummary {
        label: quarter.label.clone(),
        period_start: quarter.period_start,
        period_end: quarter.period_end,
        strict: quarter.strict,
        target_inc_vat: result.target_inc,
        actual_ex_vat: actual_ex,
        actual_vat,
        actual_inc_vat: actual_inc,
        variance_inc_vat: result.target_inc - actual_inc,
        coverage_ratio: coverage,
        invoice_count: result.invoices.len(),
        simplified_count: simplified,
        tax_count: result.invoices.len() - simplified,
        deferred_count: result.deferred.len(),
        converged: result.converged,
        balancing_used: result.balancing_used,
    }
}

/// Per-quarter state machine: B2B phase, cash phase, refinement,
/// balancing fallback.
fn align_quarter(
    inventory: &mut Inventory,
    rng: &mut ChaCha8Rng,
    config: &GeneratorConfig,
    quarter: &QuarterTarget,
    customers: &[Customer],
    holidays: &HolidayCalendar,
    stats: &mut RunStats,
) -> QuarterResult {
    let target_inc = money::round_half_up(quarter.sales_inc_vat * config.quarter_caps_target_ratio);
    info!(
        quarter = %quarter.label,
        %target_inc,
        strict = quarter.strict,
        b2b = customers.len(),
        "aligning quarter"
    );

    // Phase 1: fixed-amount tax invoices.
    let b2b_outcome = b2b::fulfil_quarter(inventory, rng, config, quarter, customers, stats);
    let mut invoices = b2b_outcome.invoices;
    let b2b_total: Decimal = invoices.iter().map(|i| i.total).sum();

    // Phase 2: cash invoices for the remaining gap.
    let remaining = target_inc - b2b_total;
    if remaining > config.alignment_strict_tolerance {
        let params = if quarter.strict {
            CashPhaseParams {
                target_inc: remaining,
                stop_below: config.alignment_strict_tolerance,
                accept_ratio: None,
                stop_within: Decimal::ZERO,
                hard_cap: remaining,
            }
        } else {
            CashPhaseParams {
                target_inc: remaining,
                stop_below: Decimal::ZERO,
                accept_ratio: Some(LOOSE_ACCEPT_RATIO),
                stop_within: LOOSE_STOP_WITHIN,
                hard_cap: money::round_half_up(remaining * LOOSE_HARD_CAP_RATIO),
            }
        };
        let cash = simulate::generate_cash_invoices(
            inventory, rng, config, quarter, holidays, &params, stats,
        );
        invoices.extend(cash);
    }

    // Phase 3: refinement toward the full quarter target.
    let refined = refine::refine_to_target(
        &mut invoices,
        inventory,
        config,
        target_inc,
        quarter.period_end,
        quarter.strict,
    );

    // Phase 4: balancing fallback for strict quarters still short.
    let mut balancing_used = false;
    if quarter.strict && refined.residual > config.alignment_strict_tolerance {
        if let Some(invoice) =
            balancing_invoice(inventory, config, quarter, holidays, refined.residual)
        {
            warn!(
                quarter = %quarter.label,
                residual = %refined.residual,
                "synthesizing balancing invoice"
            );
            invoices.push(invoice);
            stats.balancing_invoices += 1;
            balancing_used = true;
            refine::refine_to_target(
                &mut invoices,
                inventory,
                config,
                target_inc,
                quarter.period_end,
                true,
            );
        }
    }

    let actual: Decimal = invoices.iter().map(|i| i.total).sum();
    let converged = if quarter.strict {
        (target_inc - actual).abs() <= config.alignment_strict_tolerance
    } else {
        let (lo, hi) = config.alignment_loose_band;
        actual >= target_inc * lo && actual <= target_inc * hi
    };
    if quarter.strict && !converged {
        warn!(
            quarter = %quarter.label,
            residual = %(target_inc - actual),
            "strict quarter did not converge"
        );
    }

    QuarterResult {
        invoices,
        deferred: b2b_outcome.deferred,
        converged,
        balancing_used,
        target_inc,
    }
}

/// Synthesize the single balancing invoice: one line from the lot whose
/// fixed price best approximates the missing subtotal, dated on the
/// quarter's last working day.
fn balancing_invoice(
    inventory: &mut Inventory,
    config: &GeneratorConfig,
    quarter: &QuarterTarget,
    holidays: &HolidayCalendar,
    residual_inc: Decimal,
) -> Option<Invoice> {
    let day = *simulate::working_days(quarter.period_start, quarter.period_end, holidays).last()?;
    let needed_subtotal = money::net_from_gross(residual_inc, config.vat_rate);
    if needed_subtotal <= Decimal::ZERO {
        return None;
    }

    let mut best: Option<(String, u32, Decimal)> = None;
    for lot in inventory.available_lots(day, None) {
        if lot.classification.is_excise() {
            continue;
        }
        let ideal = needed_subtotal / lot.unit_price_ex_vat;
        let qty = {
            use rust_decimal::prelude::ToPrimitive;
            ideal.round().to_u32().unwrap_or(1).max(1)
        }
        .min(lot.qty_remaining);
        if qty == 0 {
            continue;
        }
        let miss = (needed_subtotal - money::line_subtotal(lot.unit_price_ex_vat, qty)).abs();
        let better = best.as_ref().map_or(true, |(_, _, m)| miss < *m);
        if better {
            best = Some((lot.lot_id.clone(), qty, miss));
        }
    }

    let (lot_id, qty, _) = best?;
    inventory.deduct(&lot_id, qty).ok()?;
    let lot = inventory.lot(&lot_id)?;
    let line = InvoiceLine::new(lot, qty);
    Some(Invoice::new(
        InvoiceKind::Simplified,
        calendar::datetime_at(day, 21, 45),
        Buyer::Cash,
        vec![line],
        config.vat_rate,
    ))
}

/// Assign sequence numbers over the date-sorted ledger: separate
/// gapless sequence spaces for simplified and tax invoices.
fn assign_numbers(invoices: &mut [Invoice], config: &GeneratorConfig) {
    let mut simplified = InvoiceNumberSequence::new(format!("{}S", config.invoice_prefix));
    let mut tax = InvoiceNumberSequence::new(format!("{}T", config.invoice_prefix));
    for invoice in invoices.iter_mut() {
        let number = match invoice.kind {
            InvoiceKind::Simplified => simplified.next_for(invoice.issue_date()),
            InvoiceKind::Tax => tax.next_for(invoice.issue_date()),
        };
        invoice.number = Some(number);
    }
}
