//! Fixed-scale decimal money arithmetic.
//!
//! All monetary values are [`rust_decimal::Decimal`] at scale 2 — never
//! floating point. Intermediate products are rounded to scale 2 before
//! summation; the rounding mode is half-up (midpoint away from zero).

use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};

/// Monetary scale: two fractional digits.
pub const SCALE: u32 = 2;

/// Round to scale 2, half-up.
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// VAT amount for an ex-VAT subtotal at the given rate.
pub fn vat_of(subtotal: Decimal, rate: Decimal) -> Decimal {
    round_half_up(subtotal * rate)
}

/// Inc-VAT total for an ex-VAT subtotal.
pub fn gross_of(subtotal: Decimal, rate: Decimal) -> Decimal {
    subtotal + vat_of(subtotal, rate)
}

/// Back out the ex-VAT subtotal from an inc-VAT total.
///
/// `gross / (1 + rate)` rounded to scale 2. The result is a starting
/// point: callers needing `net + vat_of(net) == gross` to hold exactly
/// must probe the neighbouring cents (see [`exact_net_from_gross`]).
pub fn net_from_gross(gross: Decimal, rate: Decimal) -> Decimal {
    round_half_up(gross / (Decimal::ONE + rate))
}

/// All ex-VAT subtotals `net` within ±2 cents of the naive back-out for
/// which `net + vat_of(net, rate) == gross` holds exactly at scale 2.
pub fn exact_net_from_gross(gross: Decimal, rate: Decimal) -> Vec<Decimal> {
    let base = net_from_gross(gross, rate);
    let cent = Decimal::new(1, SCALE);
    (-2i64..=2)
        .map(|k| base + cent * Decimal::from(k))
        .filter(|net| net.is_sign_positive() && gross_of(*net, rate) == gross)
        .collect()
}

/// Subtotal of a line: `round2(unit_price × qty)`.
pub fn line_subtotal(unit_price: Decimal, qty: u32) -> Decimal {
    round_half_up(unit_price * Decimal::from(qty))
}

/// A scale-2 value as an integer number of cents.
///
/// Returns `None` when the value does not fit or carries sub-cent
/// precision (callers round first).
pub fn to_cents(value: Decimal) -> Option<i64> {
    let scaled = round_half_up(value) * Decimal::from(100u32);
    if scaled.fract().is_zero() {
        scaled.to_i64()
    } else {
        None
    }
}

/// Cents back to a scale-2 decimal.
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, SCALE)
}
