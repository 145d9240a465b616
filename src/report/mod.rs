//! Run summary and the writer-facing output records.
//!
//! The core hands these flat records to the external Excel/PDF writers;
//! nothing here performs I/O.

pub mod qr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;
use crate::core::{Invoice, InvoiceKind};

/// Counters for recoverable events during generation. Diagnoses
/// low-coverage quarters without failing the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Deductions refused for lack of stock (composer then retried).
    pub insufficient_stock_events: u64,
    /// Lots skipped because the sale would be below cost.
    pub profitability_skips: u64,
    /// Composer retries after a failed lot pick.
    pub composer_retries: u64,
    /// Baskets abandoned after the retry budget ran out.
    pub baskets_abandoned: u64,
    /// B2B purchases deferred (stock or overshoot guard).
    pub b2b_deferred: u64,
    /// Balancing invoices synthesized by the non-convergence fallback.
    pub balancing_invoices: u64,
}

/// Per-quarter target-vs-actual summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterSummary {
    pub label: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub strict: bool,
    /// Declared inc-VAT target after the governor ratio.
    pub target_inc_vat: Decimal,
    pub actual_ex_vat: Decimal,
    pub actual_vat: Decimal,
    pub actual_inc_vat: Decimal,
    /// `target − actual`, inc-VAT.
    pub variance_inc_vat: Decimal,
    /// `actual / target`; well under 1.0 for starved early quarters.
    pub coverage_ratio: f64,
    pub invoice_count: usize,
    pub simplified_count: usize,
    pub tax_count: usize,
    pub deferred_count: usize,
    pub converged: bool,
    pub balancing_used: bool,
}

/// One row of the invoice-header output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceHeaderRecord {
    pub invoice_number: String,
    pub issued_at: NaiveDateTime,
    pub kind: InvoiceKind,
    pub client_name: String,
    pub client_vat_number: Option<String>,
    pub total_ex_vat: Decimal,
    pub vat_amount: Decimal,
    pub total_inc_vat: Decimal,
    /// TLV Base64 payload; simplified invoices only.
    pub qr_payload: Option<String>,
    pub excise: bool,
}

/// One row of the invoice-lines output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLineRecord {
    pub invoice_number: String,
    pub line_no: usize,
    pub lot_id: String,
    pub item_description: String,
    pub classification: String,
    pub quantity: u32,
    pub unit_price_ex_vat: Decimal,
    pub line_subtotal: Decimal,
}

fn number_of(invoice: &Invoice) -> String {
    invoice.number.clone().unwrap_or_default()
}

/// Flatten invoice headers for the writer, attaching the QR payload to
/// simplified invoices.
pub fn header_records(invoices: &[Invoice], config: &GeneratorConfig) -> Vec<InvoiceHeaderRecord> {
    invoices
        .iter()
        .map(|invoice| {
            let qr_payload = match invoice.kind {
                InvoiceKind::Simplified => Some(qr::tlv_payload(
                    &config.seller,
                    invoice.issued_at,
                    invoice.vat_amount,
                    invoice.total,
                )),
                InvoiceKind::Tax => None,
            };
            InvoiceHeaderRecord {
                invoice_number: number_of(invoice),
                issued_at: invoice.issued_at,
                kind: invoice.kind,
                client_name: invoice.buyer.name().to_string(),
                client_vat_number: invoice.buyer.vat_number().map(str::to_string),
                total_ex_vat: invoice.subtotal,
                vat_amount: invoice.vat_amount,
                total_inc_vat: invoice.total,
                qr_payload,
                excise: invoice.is_excise(),
            }
        })
        .collect()
}

/// Flatten invoice lines for the writer.
pub fn line_records(invoices: &[Invoice]) -> Vec<InvoiceLineRecord> {
    let mut out = Vec::new();
    for invoice in invoices {
        for (idx, line) in invoice.lines.iter().enumerate() {
            out.push(InvoiceLineRecord {
                invoice_number: number_of(invoice),
                line_no: idx + 1,
                lot_id: line.lot_id.clone(),
                item_description: line.item_description.clone(),
                classification: line.classification.code().to_string(),
                quantity: line.quantity,
                unit_price_ex_vat: line.unit_price_ex_vat,
                line_subtotal: line.line_subtotal,
            });
        }
    }
    out
}

/// Headers of the excise-only invoices, for the excise listing.
pub fn excise_records(invoices: &[Invoice], config: &GeneratorConfig) -> Vec<InvoiceHeaderRecord> {
    let excise: Vec<Invoice> = invoices.iter().filter(|i| i.is_excise()).cloned().collect();
    header_records(&excise, config)
}
