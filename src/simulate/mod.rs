//! Day-by-day cash-invoice stream for one quarter.
//!
//! Each working day gets a weight from day-of-week, salary-day,
//! Ramadan/Sha'ban and end-of-quarter signals; the day's share of the
//! remaining inc-VAT gap becomes its sales target. Invoice sizes come
//! from a truncated normal around an adaptive mean. All draws route
//! through the single seeded generator owned by the aligner.

use chrono::{Datelike, NaiveDate, Weekday};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::debug;

use crate::basket::{self, SizeHint};
use crate::config::GeneratorConfig;
use crate::core::calendar::{self, HolidayCalendar};
use crate::core::{money, Buyer, Invoice, InvoiceKind, QuarterTarget};
use crate::inventory::Inventory;
use crate::report::RunStats;

/// Outer cap on cash invoices per quarter; the convergence loop
/// degrades to the balancing fallback instead of spinning.
pub const MAX_INVOICES_PER_QUARTER: usize = 1000;

/// Compose failures tolerated on one day before moving on.
const MAX_DAY_FAILURES: u32 = 5;

/// Divisor turning a daily target into a per-invoice mean.
const INVOICES_PER_DAY_BASELINE: f64 = 6.0;

/// Relative standard deviation of the invoice-size distribution.
const RELATIVE_STD_DEV: f64 = 0.3;

/// Business-hour weights, 09:00 through 22:00. Lunch and early-evening
/// peaks.
const HOUR_WEIGHTS: [(u32, u32); 14] = [
    (9, 4),
    (10, 6),
    (11, 8),
    (12, 12),
    (13, 14),
    (14, 10),
    (15, 7),
    (16, 8),
    (17, 12),
    (18, 14),
    (19, 15),
    (20, 13),
    (21, 10),
    (22, 6),
];

/// Stopping discipline for the cash phase of one quarter.
#[derive(Debug, Clone, PartialEq)]
pub struct CashPhaseParams {
    /// Remaining inc-VAT gap the cash phase should close.
    pub target_inc: Decimal,
    /// Stop as soon as the remaining gap falls to this (strict tier).
    pub stop_below: Decimal,
    /// Non-strict tier: stop once generated ≥ `ratio × target` and the
    /// remaining gap is within `stop_within`.
    pub accept_ratio: Option<Decimal>,
    pub stop_within: Decimal,
    /// Never generate beyond this inc-VAT total.
    pub hard_cap: Decimal,
}

/// Peak-day predicate: Thursday, salary days (1st, 10th, 27th), or the
/// closing week of the quarter. Shared with refinement so increments
/// land on plausible days.
pub fn is_peak_day(date: NaiveDate, period_end: NaiveDate) -> bool {
    date.weekday() == Weekday::Thu
        || matches!(date.day(), 1 | 10 | 27)
        || calendar::days_between(date, period_end) < 7
}

/// Relative sales weight of one day.
pub fn day_weight(date: NaiveDate, period_end: NaiveDate) -> f64 {
    let mut w = match date.weekday() {
        Weekday::Thu => 1.5,
        Weekday::Sat => 1.3,
        Weekday::Sun => 1.2,
        Weekday::Fri => 0.0,
        _ => 1.0,
    };
    w *= match date.day() {
        27 => 1.5,
        1 => 1.2,
        10 => 1.1,
        _ => 1.0,
    };
    if calendar::is_ramadan(date) {
        w *= 2.5;
    } else if calendar::is_shaaban(date) {
        w *= 2.0;
    }
    let to_end = calendar::days_between(date, period_end);
    if to_end < 7 {
        w *= 1.8;
    } else if to_end < 14 {
        w *= 1.4;
    }
    w
}

/// Working days of `[start, end]`, ascending.
pub fn working_days(
    start: NaiveDate,
    end: NaiveDate,
    holidays: &HolidayCalendar,
) -> Vec<NaiveDate> {
    calendar::date_range(start, end)
        .into_iter()
        .filter(|d| calendar::is_working_day(*d, holidays))
        .collect()
}

/// Weighted business hour plus a uniform minute.
pub fn sample_business_hour(rng: &mut ChaCha8Rng) -> (u32, u32) {
    let total: u32 = HOUR_WEIGHTS.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0..total);
    let mut hour = HOUR_WEIGHTS[0].0;
    for (h, w) in HOUR_WEIGHTS {
        if roll < w {
            hour = h;
            break;
        }
        roll -= w;
    }
    (hour, rng.gen_range(0..60))
}

fn adaptive_mean(
    remaining_inc: Decimal,
    remaining_days: usize,
    day: NaiveDate,
    period_end: NaiveDate,
    config: &GeneratorConfig,
) -> f64 {
    let (lo, hi) = config.invoice_amount_bounds;
    let lo = lo.to_f64().unwrap_or(500.0);
    let hi = hi.to_f64().unwrap_or(10_000.0);
    let remaining = remaining_inc.to_f64().unwrap_or(0.0).max(0.0);
    let mut mean = remaining / remaining_days.max(1) as f64 / INVOICES_PER_DAY_BASELINE;
    if is_peak_day(day, period_end) {
        mean *= 1.5;
    }
    if calendar::days_between(day, period_end) < 7 {
        mean *= 1.5;
    }
    mean.clamp(lo, hi)
}

/// Truncated-normal invoice size, clipped to the configured bounds.
fn sample_invoice_amount(rng: &mut ChaCha8Rng, mean: f64, config: &GeneratorConfig) -> Decimal {
    let (lo, hi) = config.invoice_amount_bounds;
    let lo_f = lo.to_f64().unwrap_or(500.0);
    let hi_f = hi.to_f64().unwrap_or(10_000.0);
    let sample = match Normal::new(mean, mean * RELATIVE_STD_DEV) {
        Ok(normal) => {
            let mut value = normal.sample(rng);
            for _ in 0..8 {
                if (lo_f..=hi_f).contains(&value) {
                    break;
                }
                value = normal.sample(rng);
            }
            value.clamp(lo_f, hi_f)
        }
        Err(_) => mean.clamp(lo_f, hi_f),
    };
    money::round_half_up(Decimal::from_f64(sample).unwrap_or(lo))
}

fn decimal_share(value: Decimal, share: f64) -> Decimal {
    let factor = Decimal::from_f64(share.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
    money::round_half_up(value * factor)
}

fn stop_reached(generated: Decimal, params: &CashPhaseParams) -> bool {
    let remaining = params.target_inc - generated;
    if remaining <= params.stop_below {
        return true;
    }
    if let Some(ratio) = params.accept_ratio {
        if generated >= params.target_inc * ratio && remaining <= params.stop_within {
            return true;
        }
    }
    generated >= params.hard_cap
}

/// Generate simplified cash invoices that close the quarter's remaining
/// gap under the active stopping tier.
pub fn generate_cash_invoices(
    inventory: &mut Inventory,
    rng: &mut ChaCha8Rng,
    config: &GeneratorConfig,
    quarter: &QuarterTarget,
    holidays: &HolidayCalendar,
    params: &CashPhaseParams,
    stats: &mut RunStats,
) -> Vec<Invoice> {
    let days = working_days(quarter.period_start, quarter.period_end, holidays);
    let weights: Vec<f64> = days
        .iter()
        .map(|d| day_weight(*d, quarter.period_end))
        .collect();

    let mut invoices: Vec<Invoice> = Vec::new();
    let mut generated = Decimal::ZERO;

    'days: for (idx, day) in days.iter().enumerate() {
        if stop_reached(generated, params) {
            break;
        }
        let remaining = params.target_inc - generated;
        if remaining <= Decimal::ZERO {
            break;
        }
        let weight_sum: f64 = weights[idx..].iter().sum();
        if weight_sum <= f64::EPSILON {
            break;
        }
        let day_target = decimal_share(remaining, weights[idx] / weight_sum);
        let remaining_days = days.len() - idx;

        let mut day_total = Decimal::ZERO;
        let mut failures = 0u32;
        while day_total < day_target && failures < MAX_DAY_FAILURES {
            if invoices.len() >= MAX_INVOICES_PER_QUARTER || stop_reached(generated, params) {
                break 'days;
            }
            let gap = params.target_inc - generated;
            if gap <= Decimal::ZERO {
                break 'days;
            }

            let mean = adaptive_mean(gap, remaining_days, *day, quarter.period_end, config);
            let amount = sample_invoice_amount(rng, mean, config).min(gap);
            let subtotal_target = money::net_from_gross(amount, config.vat_rate);

            let Some(composed) = basket::compose(
                inventory,
                rng,
                config,
                InvoiceKind::Simplified,
                *day,
                SizeHint::Amount(subtotal_target),
                stats,
            ) else {
                failures += 1;
                continue;
            };

            let (hour, minute) = sample_business_hour(rng);
            let invoice = Invoice::new(
                InvoiceKind::Simplified,
                calendar::datetime_at(*day, hour, minute),
                Buyer::Cash,
                composed.lines,
                config.vat_rate,
            );
            day_total += invoice.total;
            generated += invoice.total;
            invoices.push(invoice);
        }
        if failures >= MAX_DAY_FAILURES {
            debug!(%day, "day abandoned after repeated compose failures");
        }
    }

    invoices
}
