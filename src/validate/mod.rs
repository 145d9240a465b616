//! Post-run validators.
//!
//! Each check walks the finished ledger and returns findings instead of
//! failing fast, so one report carries everything a reviewer needs.
//! Critical findings in a strict quarter mark the run failed.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{GeneratorConfig, PricingPolicy};
use crate::core::calendar::{self, HolidayCalendar};
use crate::core::{
    money, parse_sequence, Classification, Invoice, InvoiceKind, QuarterTarget, ValidationFinding,
};
use crate::inventory::Inventory;

/// Run every check over the finished ledger.
pub fn run_all(
    invoices: &[Invoice],
    inventory: &Inventory,
    holidays: &HolidayCalendar,
    quarters: &[QuarterTarget],
    config: &GeneratorConfig,
) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    findings.extend(check_arithmetic(invoices, config));
    findings.extend(check_price_fidelity(invoices, inventory, config));
    findings.extend(check_profitability(invoices, inventory));
    findings.extend(check_inventory_integrity(invoices, inventory));
    findings.extend(check_quarter_totals(invoices, quarters, config));
    findings.extend(check_calendar(invoices, holidays));
    findings.extend(check_classification(invoices));
    findings.extend(check_numbering(invoices));
    findings
}

/// Per-invoice arithmetic: line subtotals, VAT derivation, total.
pub fn check_arithmetic(invoices: &[Invoice], config: &GeneratorConfig) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for invoice in invoices {
        let number = invoice.number.as_deref().unwrap_or("<unnumbered>");
        for (idx, line) in invoice.lines.iter().enumerate() {
            let expected = money::line_subtotal(line.unit_price_ex_vat, line.quantity);
            if line.line_subtotal != expected {
                findings.push(ValidationFinding::critical(
                    "arithmetic",
                    format!(
                        "invoice {number} line {}: subtotal {} != round2({} × {})",
                        idx + 1,
                        line.line_subtotal,
                        line.unit_price_ex_vat,
                        line.quantity
                    ),
                ));
            }
            if line.quantity == 0 {
                findings.push(ValidationFinding::critical(
                    "arithmetic",
                    format!("invoice {number} line {}: zero quantity", idx + 1),
                ));
            }
        }
        let line_sum: Decimal = invoice.lines.iter().map(|l| l.line_subtotal).sum();
        if invoice.subtotal != line_sum {
            findings.push(ValidationFinding::critical(
                "arithmetic",
                format!(
                    "invoice {number}: subtotal {} != line sum {line_sum}",
                    invoice.subtotal
                ),
            ));
        }
        if invoice.vat_amount != money::vat_of(invoice.subtotal, config.vat_rate) {
            findings.push(ValidationFinding::critical(
                "arithmetic",
                format!(
                    "invoice {number}: vat {} != round2({} × {})",
                    invoice.vat_amount, invoice.subtotal, config.vat_rate
                ),
            ));
        }
        if invoice.total != invoice.subtotal + invoice.vat_amount {
            findings.push(ValidationFinding::critical(
                "arithmetic",
                format!(
                    "invoice {number}: total {} != subtotal + vat",
                    invoice.total
                ),
            ));
        }
    }
    findings
}

/// Every line's unit price equals its lot's catalog price exactly.
/// Only certifies the default per-lot pricing policy.
pub fn check_price_fidelity(
    invoices: &[Invoice],
    inventory: &Inventory,
    config: &GeneratorConfig,
) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    if config.pricing_policy != PricingPolicy::LotPrice {
        return findings;
    }
    for invoice in invoices {
        let number = invoice.number.as_deref().unwrap_or("<unnumbered>");
        for line in &invoice.lines {
            match inventory.lot(&line.lot_id) {
                None => findings.push(ValidationFinding::critical(
                    "price-fidelity",
                    format!("invoice {number}: unknown lot {}", line.lot_id),
                )),
                Some(lot) => {
                    if line.unit_price_ex_vat != lot.unit_price_ex_vat {
                        findings.push(ValidationFinding::critical(
                            "price-fidelity",
                            format!(
                                "invoice {number} lot {}: line price {} != catalog price {}",
                                line.lot_id, line.unit_price_ex_vat, lot.unit_price_ex_vat
                            ),
                        ));
                    }
                }
            }
        }
    }
    findings
}

/// No line sells below its lot's catalog cost.
pub fn check_profitability(invoices: &[Invoice], inventory: &Inventory) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for invoice in invoices {
        let number = invoice.number.as_deref().unwrap_or("<unnumbered>");
        for line in &invoice.lines {
            let catalog_cost = inventory
                .lot(&line.lot_id)
                .map(|lot| lot.unit_cost_ex_vat)
                .unwrap_or(line.unit_cost_ex_vat);
            if line.unit_price_ex_vat < catalog_cost {
                findings.push(ValidationFinding::critical(
                    "profitability",
                    format!(
                        "invoice {number} lot {}: price {} below cost {catalog_cost}",
                        line.lot_id, line.unit_price_ex_vat
                    ),
                ));
            }
        }
    }
    findings
}

/// Remaining stock bounds, and ledger deductions reconcile per lot.
pub fn check_inventory_integrity(
    invoices: &[Invoice],
    inventory: &Inventory,
) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    let mut sold: HashMap<&str, u64> = HashMap::new();
    for invoice in invoices {
        for line in &invoice.lines {
            *sold.entry(line.lot_id.as_str()).or_default() += line.quantity as u64;
        }
    }
    for lot in inventory.iter() {
        if lot.qty_remaining > lot.qty_imported {
            findings.push(ValidationFinding::critical(
                "inventory-integrity",
                format!(
                    "lot {}: remaining {} exceeds imported {}",
                    lot.lot_id, lot.qty_remaining, lot.qty_imported
                ),
            ));
        }
        let ledger_sold = sold.get(lot.lot_id.as_str()).copied().unwrap_or(0);
        let deducted = (lot.qty_imported - lot.qty_remaining) as u64;
        if ledger_sold != deducted {
            findings.push(ValidationFinding::critical(
                "inventory-integrity",
                format!(
                    "lot {}: ledger sold {ledger_sold} but inventory shows {deducted} deducted",
                    lot.lot_id
                ),
            ));
        }
    }
    findings
}

/// Strict quarters close within tolerance; non-strict quarters record
/// variance outside the loose band without failing.
pub fn check_quarter_totals(
    invoices: &[Invoice],
    quarters: &[QuarterTarget],
    config: &GeneratorConfig,
) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for quarter in quarters {
        let target = money::round_half_up(quarter.sales_inc_vat * config.quarter_caps_target_ratio);
        let actual: Decimal = invoices
            .iter()
            .filter(|i| quarter.contains(i.issue_date()))
            .map(|i| i.total)
            .sum();
        let variance = target - actual;
        if quarter.strict {
            if variance.abs() > config.alignment_strict_tolerance {
                findings.push(ValidationFinding::critical(
                    "quarter-totals",
                    format!(
                        "strict quarter {}: |{target} − {actual}| = {} exceeds tolerance {}",
                        quarter.label,
                        variance.abs(),
                        config.alignment_strict_tolerance
                    ),
                ));
            }
        } else {
            let (lo, hi) = config.alignment_loose_band;
            if actual < target * lo || actual > target * hi {
                findings.push(ValidationFinding::warning(
                    "quarter-totals",
                    format!(
                        "quarter {}: actual {actual} outside acceptance band of target {target}",
                        quarter.label
                    ),
                ));
            }
        }
    }
    findings
}

/// No invoice dated on a Friday or an official holiday.
pub fn check_calendar(invoices: &[Invoice], holidays: &HolidayCalendar) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for invoice in invoices {
        if !calendar::is_working_day(invoice.issue_date(), holidays) {
            findings.push(ValidationFinding::critical(
                "calendar",
                format!(
                    "invoice {} dated on a closed day {}",
                    invoice.number.as_deref().unwrap_or("<unnumbered>"),
                    invoice.issue_date()
                ),
            ));
        }
    }
    findings
}

/// Excise exclusivity and the TAX-invoice classification rule.
pub fn check_classification(invoices: &[Invoice]) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for invoice in invoices {
        let number = invoice.number.as_deref().unwrap_or("<unnumbered>");
        let has_excise = invoice.lines.iter().any(|l| l.classification.is_excise());
        if has_excise && invoice.lines.len() > 1 {
            findings.push(ValidationFinding::critical(
                "classification",
                format!("invoice {number}: excise line shares the invoice with other lines"),
            ));
        }
        if has_excise && invoice.kind == InvoiceKind::Tax {
            findings.push(ValidationFinding::critical(
                "classification",
                format!("invoice {number}: excise line on a tax invoice"),
            ));
        }
        if invoice.kind == InvoiceKind::Tax {
            for line in &invoice.lines {
                if line.classification != Classification::NonExciseInspection {
                    findings.push(ValidationFinding::critical(
                        "classification",
                        format!(
                            "tax invoice {number}: line class {} is not inspected non-excise",
                            line.classification.code()
                        ),
                    ));
                }
            }
        }
    }
    findings
}

/// Simplified and tax sequences are gapless ascending runs from 1, in
/// ledger order.
pub fn check_numbering(invoices: &[Invoice]) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for kind in [InvoiceKind::Simplified, InvoiceKind::Tax] {
        let mut expected = 1u64;
        for invoice in invoices.iter().filter(|i| i.kind == kind) {
            match invoice.number.as_deref().and_then(parse_sequence) {
                None => {
                    findings.push(ValidationFinding::critical(
                        "numbering",
                        format!(
                            "{} invoice dated {} has no parseable number",
                            kind.code(),
                            invoice.issue_date()
                        ),
                    ));
                }
                Some(seq) => {
                    if seq != expected {
                        findings.push(ValidationFinding::critical(
                            "numbering",
                            format!(
                                "{} sequence jumps to {seq}, expected {expected}",
                                kind.code()
                            ),
                        ));
                    }
                    expected = seq + 1;
                }
            }
        }
    }
    findings
}

/// Revenue/cost aggregation per item and quarter, for the profitability
/// section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitabilityRow {
    pub quarter_label: String,
    pub item_description: String,
    pub units: u64,
    pub revenue_ex_vat: Decimal,
    pub cost_ex_vat: Decimal,
    pub margin_ex_vat: Decimal,
}

/// Aggregate line-level profitability by item and quarter.
pub fn profitability_by_item(
    invoices: &[Invoice],
    quarters: &[QuarterTarget],
) -> Vec<ProfitabilityRow> {
    let mut rows: Vec<ProfitabilityRow> = Vec::new();
    for quarter in quarters {
        let mut by_item: HashMap<&str, (u64, Decimal, Decimal)> = HashMap::new();
        for invoice in invoices.iter().filter(|i| quarter.contains(i.issue_date())) {
            for line in &invoice.lines {
                let entry = by_item.entry(line.item_description.as_str()).or_default();
                entry.0 += line.quantity as u64;
                entry.1 += line.line_subtotal;
                entry.2 += money::round_half_up(
                    line.unit_cost_ex_vat * Decimal::from(line.quantity),
                );
            }
        }
        let mut items: Vec<_> = by_item.into_iter().collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        for (item, (units, revenue, cost)) in items {
            rows.push(ProfitabilityRow {
                quarter_label: quarter.label.clone(),
                item_description: item.to_string(),
                units,
                revenue_ex_vat: revenue,
                cost_ex_vat: cost,
                margin_ex_vat: revenue - cost,
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{calendar::HolidayCalendar, Buyer, InvoiceLine};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn line(class: Classification) -> InvoiceLine {
        InvoiceLine {
            lot_id: "D-1:tea".into(),
            item_description: "tea".into(),
            classification: class,
            quantity: 10,
            unit_price_ex_vat: dec!(10.00),
            unit_cost_ex_vat: dec!(8.00),
            line_subtotal: dec!(100.00),
        }
    }

    fn invoice(kind: InvoiceKind, day: NaiveDate, lines: Vec<InvoiceLine>) -> Invoice {
        let mut inv = Invoice::new(
            kind,
            calendar::datetime_at(day, 12, 0),
            Buyer::Cash,
            lines,
            dec!(0.15),
        );
        inv.number = Some(match kind {
            InvoiceKind::Simplified => "INVS-202403-0001".into(),
            InvoiceKind::Tax => "INVT-202403-0001".into(),
        });
        inv
    }

    #[test]
    fn clean_invoice_passes_arithmetic() {
        let config = GeneratorConfig::default();
        let inv = invoice(
            InvoiceKind::Simplified,
            date(2024, 3, 12),
            vec![line(Classification::NonExciseOutside)],
        );
        assert!(check_arithmetic(&[inv], &config).is_empty());
    }

    #[test]
    fn tampered_vat_is_flagged() {
        let config = GeneratorConfig::default();
        let mut inv = invoice(
            InvoiceKind::Simplified,
            date(2024, 3, 12),
            vec![line(Classification::NonExciseOutside)],
        );
        inv.vat_amount += dec!(0.01);
        inv.total = inv.subtotal + inv.vat_amount;
        let findings = check_arithmetic(&[inv], &config);
        assert!(findings.iter().any(|f| f.check == "arithmetic"));
    }

    #[test]
    fn friday_invoice_is_flagged() {
        let holidays = HolidayCalendar::default();
        let inv = invoice(
            InvoiceKind::Simplified,
            date(2024, 6, 14), // Friday
            vec![line(Classification::NonExciseOutside)],
        );
        let findings = check_calendar(&[inv], &holidays);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, "calendar");
    }

    #[test]
    fn excise_mixing_is_flagged() {
        let inv = invoice(
            InvoiceKind::Simplified,
            date(2024, 3, 12),
            vec![
                line(Classification::ExciseInspection),
                line(Classification::NonExciseOutside),
            ],
        );
        let findings = check_classification(&[inv]);
        assert!(findings.iter().any(|f| f.check == "classification"));
    }

    #[test]
    fn tax_invoice_with_outside_goods_is_flagged() {
        let inv = invoice(
            InvoiceKind::Tax,
            date(2024, 3, 12),
            vec![line(Classification::NonExciseOutside)],
        );
        let findings = check_classification(&[inv]);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn numbering_gap_is_flagged() {
        let mut a = invoice(
            InvoiceKind::Simplified,
            date(2024, 3, 12),
            vec![line(Classification::NonExciseOutside)],
        );
        a.number = Some("INVS-202403-0001".into());
        let mut b = a.clone();
        b.number = Some("INVS-202403-0003".into());
        let findings = check_numbering(&[a, b]);
        assert!(findings.iter().any(|f| f.check == "numbering"));
    }

    #[test]
    fn profitability_aggregates_by_item() {
        let quarters = vec![QuarterTarget {
            label: "Q1-2024".into(),
            period_start: date(2024, 1, 1),
            period_end: date(2024, 3, 31),
            sales_ex_vat: dec!(100.00),
            vat_amount: dec!(15.00),
            sales_inc_vat: dec!(115.00),
            strict: false,
        }];
        let inv = invoice(
            InvoiceKind::Simplified,
            date(2024, 3, 12),
            vec![line(Classification::NonExciseOutside)],
        );
        let rows = profitability_by_item(&[inv], &quarters);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].units, 10);
        assert_eq!(rows[0].revenue_ex_vat, dec!(100.00));
        assert_eq!(rows[0].cost_ex_vat, dec!(80.00));
        assert_eq!(rows[0].margin_ex_vat, dec!(20.00));
    }
}
