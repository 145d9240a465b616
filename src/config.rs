//! Runtime configuration for a synthesis run.
//!
//! Every option has a default; a run with `GeneratorConfig::default()`
//! and a fixed seed is fully reproducible.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::core::DaftarError;

/// Pricing policy for lines that span multiple lots of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingPolicy {
    /// Each line carries its own lot's catalog price. Required default.
    LotPrice,
    /// Blend the spanned lots into one line at the quantity-weighted
    /// average price. Disallowed unless explicitly configured; the
    /// price-fidelity validator only certifies `LotPrice` ledgers.
    WeightedAverage,
}

/// Seller identity stamped into tax invoices and the simplified-invoice
/// QR payload. Process-wide constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerIdentity {
    pub name: String,
    pub vat_number: String,
}

impl Default for SellerIdentity {
    fn default() -> Self {
        Self {
            name: "Modern Trading Est.".into(),
            vat_number: "310000000000003".into(),
        }
    }
}

/// All runtime knobs of the synthesis core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// VAT multiplier applied to every subtotal.
    pub vat_rate: Decimal,
    /// Seeds the single ChaCha generator; identical inputs and seed
    /// produce a byte-identical ledger.
    pub random_seed: u64,
    /// Numbering prefix; simplified and tax sequences derive their own
    /// prefixes from it ("{prefix}S" / "{prefix}T").
    pub invoice_prefix: String,
    /// `[min, max]` days added to `import_date` to form `stock_date`.
    pub lot_activation_days: (u32, u32),
    /// `[min, max]` lines per invoice (excise-exclusive invoices are 1).
    pub line_items_per_invoice: (u32, u32),
    /// `[min, max]` units per line.
    pub quantity_per_line: (u32, u32),
    pub pricing_policy: PricingPolicy,
    /// Governor on the quarter target: the aligner chases
    /// `sales_inc_vat × ratio`.
    pub quarter_caps_target_ratio: Decimal,
    /// Share of simplified invoices that are excise-only.
    pub excise_exclusive_ratio: f64,
    /// Closure tolerance for strict quarters.
    pub alignment_strict_tolerance: Decimal,
    /// Acceptance band for non-strict quarters, as ratios of target.
    pub alignment_loose_band: (Decimal, Decimal),
    /// Coarse refinement tolerance; the strict inner pass then chases
    /// `alignment_strict_tolerance`.
    pub refine_tolerance_coarse: Decimal,
    /// Iteration cap per refinement pass.
    pub refine_max_iterations: u32,
    /// `[min, max]` inc-VAT size of a single cash invoice.
    pub invoice_amount_bounds: (Decimal, Decimal),
    pub seller: SellerIdentity,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            vat_rate: dec!(0.15),
            random_seed: 0,
            invoice_prefix: "INV".into(),
            lot_activation_days: (0, 12),
            line_items_per_invoice: (2, 10),
            quantity_per_line: (3, 40),
            pricing_policy: PricingPolicy::LotPrice,
            quarter_caps_target_ratio: dec!(1.00),
            excise_exclusive_ratio: 0.2,
            alignment_strict_tolerance: dec!(0.10),
            alignment_loose_band: (dec!(0.80), dec!(1.20)),
            refine_tolerance_coarse: dec!(5.00),
            refine_max_iterations: 50,
            invoice_amount_bounds: (dec!(500), dec!(10000)),
            seller: SellerIdentity::default(),
        }
    }
}

impl GeneratorConfig {
    /// Reject configurations the generator cannot honour.
    pub fn validate(&self) -> Result<(), DaftarError> {
        if self.vat_rate <= Decimal::ZERO || self.vat_rate >= Decimal::ONE {
            return Err(DaftarError::Config(format!(
                "vat_rate {} must be in (0, 1)",
                self.vat_rate
            )));
        }
        for (name, (lo, hi)) in [
            ("lot_activation_days", self.lot_activation_days),
            ("line_items_per_invoice", self.line_items_per_invoice),
            ("quantity_per_line", self.quantity_per_line),
        ] {
            if lo > hi {
                return Err(DaftarError::Config(format!("{name}: min {lo} > max {hi}")));
            }
        }
        if self.line_items_per_invoice.0 < 1 {
            return Err(DaftarError::Config(
                "line_items_per_invoice: min must be at least 1".into(),
            ));
        }
        if self.quantity_per_line.0 < 1 {
            return Err(DaftarError::Config(
                "quantity_per_line: min must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.excise_exclusive_ratio) {
            return Err(DaftarError::Config(format!(
                "excise_exclusive_ratio {} must be in [0, 1]",
                self.excise_exclusive_ratio
            )));
        }
        if self.alignment_strict_tolerance < Decimal::ZERO {
            return Err(DaftarError::Config(
                "alignment_strict_tolerance must not be negative".into(),
            ));
        }
        let (lo, hi) = self.alignment_loose_band;
        if lo > hi || lo <= Decimal::ZERO {
            return Err(DaftarError::Config(format!(
                "alignment_loose_band ({lo}, {hi}) is not a valid band"
            )));
        }
        let (amin, amax) = self.invoice_amount_bounds;
        if amin <= Decimal::ZERO || amin > amax {
            return Err(DaftarError::Config(format!(
                "invoice_amount_bounds ({amin}, {amax}) is not a valid range"
            )));
        }
        if self.refine_max_iterations == 0 {
            return Err(DaftarError::Config(
                "refine_max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
