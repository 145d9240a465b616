use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DaftarError;
use super::money;

/// Excise/inspection tag carried by every lot. Governs which lots may
/// share an invoice and which invoices a lot may appear on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// Excise-inspected goods. Sold on simplified invoices only, and
    /// always alone on the invoice.
    ExciseInspection,
    /// Inspected non-excise goods. The only class business customers buy.
    NonExciseInspection,
    /// Goods imported outside the inspection regime. Cash sales only.
    NonExciseOutside,
}

impl Classification {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExciseInspection => "EXC_INSPECTION",
            Self::NonExciseInspection => "NONEXC_INSPECTION",
            Self::NonExciseOutside => "NONEXC_OUTSIDE",
        }
    }

    /// Map a raw catalog `shipment_class` cell to a classification.
    /// Readers call this while shaping rows; unknown values are an
    /// input-shape error on their side.
    pub fn from_shipment_class(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "EXC_INSPECTION" | "EXCISE" | "EXCISE_INSPECTION" => Some(Self::ExciseInspection),
            "NONEXC_INSPECTION" | "INSPECTION" | "INSPECTED" => Some(Self::NonExciseInspection),
            "NONEXC_OUTSIDE" | "OUTSIDE" | "OUTSIDE_INSPECTION" => Some(Self::NonExciseOutside),
            _ => None,
        }
    }

    pub fn is_excise(&self) -> bool {
        matches!(self, Self::ExciseInspection)
    }
}

/// Lot key: `customs_declaration_no + ":" + item_description`.
pub fn lot_key(customs_declaration_no: &str, item_description: &str) -> String {
    format!("{customs_declaration_no}:{item_description}")
}

/// One pre-parsed product-catalog row, as handed over by the Excel reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRow {
    pub customs_declaration_no: String,
    /// Free-form, possibly non-Latin.
    pub item_description: String,
    pub classification: Classification,
    pub import_date: NaiveDate,
    pub qty_imported: u32,
    pub unit_cost_ex_vat: Decimal,
    pub unit_price_ex_vat: Decimal,
    /// Informational; the catalog price is authoritative.
    pub margin_pct: Option<Decimal>,
}

/// The atomic inventory unit: one physically imported parcel with its
/// own frozen price and cost.
///
/// Created at load, mutated only by inventory deduction, never destroyed
/// within a run. Price and cost are never recomputed or averaged across
/// lots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    /// `customs_declaration_no:item_description`.
    pub lot_id: String,
    pub customs_declaration_no: String,
    pub item_description: String,
    pub classification: Classification,
    pub import_date: NaiveDate,
    /// First sellable date: `import_date` + activation delay.
    pub stock_date: NaiveDate,
    pub qty_imported: u32,
    pub qty_remaining: u32,
    pub unit_cost_ex_vat: Decimal,
    pub unit_price_ex_vat: Decimal,
}

impl Lot {
    /// Sellable on `as_of`: stock date reached and stock remaining.
    pub fn is_active(&self, as_of: NaiveDate) -> bool {
        self.stock_date <= as_of && self.qty_remaining > 0
    }

    /// Catalog price at or above catalog cost.
    pub fn is_profitable(&self) -> bool {
        self.unit_price_ex_vat >= self.unit_cost_ex_vat
    }
}

/// A business customer's recorded purchase. Used exactly once, to
/// produce one tax invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    /// Kept as text to retain leading zeros.
    pub vat_number: String,
    pub address: String,
    pub amount_inc_vat: Decimal,
    pub purchase_date: NaiveDate,
}

/// An official-holiday calendar row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
}

/// Declared totals one quarter of the ledger must reconcile to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarterTarget {
    pub label: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub sales_ex_vat: Decimal,
    pub vat_amount: Decimal,
    pub sales_inc_vat: Decimal,
    /// Strict quarters must close within the configured tolerance;
    /// earliest periods are best-effort.
    pub strict: bool,
}

impl QuarterTarget {
    /// Check the declared triple for internal consistency:
    /// `sales_inc_vat = sales_ex_vat + vat_amount` and
    /// `vat_amount = round2(sales_ex_vat × rate)`.
    pub fn validate(&self, vat_rate: Decimal) -> Result<(), DaftarError> {
        if self.period_end < self.period_start {
            return Err(DaftarError::InputShape(format!(
                "quarter {}: period end {} precedes start {}",
                self.label, self.period_end, self.period_start
            )));
        }
        if self.sales_ex_vat + self.vat_amount != self.sales_inc_vat {
            return Err(DaftarError::InputShape(format!(
                "quarter {}: sales_ex_vat {} + vat {} != sales_inc_vat {}",
                self.label, self.sales_ex_vat, self.vat_amount, self.sales_inc_vat
            )));
        }
        let expected_vat = money::vat_of(self.sales_ex_vat, vat_rate);
        if expected_vat != self.vat_amount {
            return Err(DaftarError::InputShape(format!(
                "quarter {}: declared vat {} != round2({} × {}) = {}",
                self.label, self.vat_amount, self.sales_ex_vat, vat_rate, expected_vat
            )));
        }
        Ok(())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.period_start <= date && date <= self.period_end
    }
}

/// Invoice flavour: simplified (cash receipt) or tax (named B2B buyer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceKind {
    Simplified,
    Tax,
}

impl InvoiceKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Simplified => "SIMPLIFIED",
            Self::Tax => "TAX",
        }
    }
}

/// Buyer identity on an invoice: the cash sentinel or a snapshot of the
/// business customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Buyer {
    Cash,
    Business {
        name: String,
        vat_number: String,
        address: String,
    },
}

impl Buyer {
    pub fn from_customer(customer: &Customer) -> Self {
        Self::Business {
            name: customer.name.clone(),
            vat_number: customer.vat_number.clone(),
            address: customer.address.clone(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Cash => "cash customer",
            Self::Business { name, .. } => name,
        }
    }

    pub fn vat_number(&self) -> Option<&str> {
        match self {
            Self::Cash => None,
            Self::Business { vat_number, .. } => Some(vat_number),
        }
    }
}

/// One invoice line, referencing a specific lot by id and carrying the
/// lot's price/cost snapshot.
///
/// Two lines drawing from different lots of the same item description
/// stay separate lines with their own prices — never merged or averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub lot_id: String,
    pub item_description: String,
    pub classification: Classification,
    pub quantity: u32,
    pub unit_price_ex_vat: Decimal,
    pub unit_cost_ex_vat: Decimal,
    /// `round2(unit_price × qty)`.
    pub line_subtotal: Decimal,
}

impl InvoiceLine {
    pub fn new(lot: &Lot, quantity: u32) -> Self {
        Self {
            lot_id: lot.lot_id.clone(),
            item_description: lot.item_description.clone(),
            classification: lot.classification,
            quantity,
            unit_price_ex_vat: lot.unit_price_ex_vat,
            unit_cost_ex_vat: lot.unit_cost_ex_vat,
            line_subtotal: money::line_subtotal(lot.unit_price_ex_vat, quantity),
        }
    }

    /// Re-derive the subtotal after a quantity adjustment.
    pub fn recompute_subtotal(&mut self) {
        self.line_subtotal = money::line_subtotal(self.unit_price_ex_vat, self.quantity);
    }
}

/// A synthesized invoice.
///
/// The sequential number is assigned after alignment, in a deterministic
/// traversal by date and emission order; until then it is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub number: Option<String>,
    pub kind: InvoiceKind,
    pub issued_at: NaiveDateTime,
    pub buyer: Buyer,
    pub lines: Vec<InvoiceLine>,
    /// `Σ line.line_subtotal`.
    pub subtotal: Decimal,
    /// `round2(subtotal × vat_rate)`.
    pub vat_amount: Decimal,
    /// `subtotal + vat_amount`.
    pub total: Decimal,
}

impl Invoice {
    pub fn new(
        kind: InvoiceKind,
        issued_at: NaiveDateTime,
        buyer: Buyer,
        lines: Vec<InvoiceLine>,
        vat_rate: Decimal,
    ) -> Self {
        let mut invoice = Self {
            number: None,
            kind,
            issued_at,
            buyer,
            lines,
            subtotal: Decimal::ZERO,
            vat_amount: Decimal::ZERO,
            total: Decimal::ZERO,
        };
        invoice.recompute_totals(vat_rate);
        invoice
    }

    /// Re-derive subtotal, VAT and total from the lines.
    pub fn recompute_totals(&mut self, vat_rate: Decimal) {
        self.subtotal = self.lines.iter().map(|l| l.line_subtotal).sum();
        self.vat_amount = money::vat_of(self.subtotal, vat_rate);
        self.total = self.subtotal + self.vat_amount;
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issued_at.date()
    }

    /// True when any line carries an excise lot (which the composition
    /// rules force to be the only line).
    pub fn is_excise(&self) -> bool {
        self.lines.iter().any(|l| l.classification.is_excise())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lot(price: Decimal, cost: Decimal) -> Lot {
        Lot {
            lot_id: lot_key("D-100", "Glass teapot"),
            customs_declaration_no: "D-100".into(),
            item_description: "Glass teapot".into(),
            classification: Classification::NonExciseInspection,
            import_date: date(2024, 1, 1),
            stock_date: date(2024, 1, 5),
            qty_imported: 100,
            qty_remaining: 100,
            unit_cost_ex_vat: cost,
            unit_price_ex_vat: price,
        }
    }

    #[test]
    fn lot_key_format() {
        assert_eq!(lot_key("D-42", "شاي أخضر"), "D-42:شاي أخضر");
    }

    #[test]
    fn shipment_class_mapping() {
        assert_eq!(
            Classification::from_shipment_class(" excise "),
            Some(Classification::ExciseInspection)
        );
        assert_eq!(
            Classification::from_shipment_class("NONEXC_OUTSIDE"),
            Some(Classification::NonExciseOutside)
        );
        assert_eq!(Classification::from_shipment_class("bogus"), None);
    }

    #[test]
    fn lot_activation_and_profitability() {
        let l = lot(dec!(10.00), dec!(8.00));
        assert!(!l.is_active(date(2024, 1, 4)));
        assert!(l.is_active(date(2024, 1, 5)));
        assert!(l.is_profitable());
        assert!(!lot(dec!(7.99), dec!(8.00)).is_profitable());
    }

    #[test]
    fn quarter_target_consistency() {
        let q = QuarterTarget {
            label: "Q1-2024".into(),
            period_start: date(2024, 1, 1),
            period_end: date(2024, 3, 31),
            sales_ex_vat: dec!(916376.73),
            vat_amount: dec!(137456.51),
            sales_inc_vat: dec!(1053833.24),
            strict: true,
        };
        assert!(q.validate(dec!(0.15)).is_ok());

        let broken = QuarterTarget {
            vat_amount: dec!(137456.52),
            sales_inc_vat: dec!(1053833.25),
            ..q.clone()
        };
        assert!(broken.validate(dec!(0.15)).is_err());
    }

    #[test]
    fn invoice_totals() {
        let a = lot(dec!(10.00), dec!(8.00));
        let lines = vec![InvoiceLine::new(&a, 100), InvoiceLine::new(&a, 50)];
        let invoice = Invoice::new(
            InvoiceKind::Simplified,
            crate::core::calendar::datetime_at(date(2024, 2, 1), 12, 0),
            Buyer::Cash,
            lines,
            dec!(0.15),
        );
        assert_eq!(invoice.subtotal, dec!(1500.00));
        assert_eq!(invoice.vat_amount, dec!(225.00));
        assert_eq!(invoice.total, dec!(1725.00));
        assert!(!invoice.is_excise());
    }
}
