//! Composer-level scenarios exercised through the public API.

use chrono::NaiveDate;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use daftar::basket::{compose, lines_for_item_quantity, SizeHint};
use daftar::config::{GeneratorConfig, PricingPolicy};
use daftar::core::{calendar, Buyer, CatalogRow, Classification, Invoice, InvoiceKind};
use daftar::inventory::Inventory;
use daftar::report::RunStats;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn load(rows: Vec<CatalogRow>) -> Inventory {
    let config = GeneratorConfig {
        lot_activation_days: (0, 0),
        ..Default::default()
    };
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    Inventory::load(rows, &config, None, &mut rng).unwrap()
}

fn row(
    decl: &str,
    item: &str,
    class: Classification,
    day: u32,
    qty: u32,
    cost: Decimal,
    price: Decimal,
) -> CatalogRow {
    CatalogRow {
        customs_declaration_no: decl.into(),
        item_description: item.into(),
        classification: class,
        import_date: date(2024, 1, day),
        qty_imported: qty,
        unit_cost_ex_vat: cost,
        unit_price_ex_vat: price,
        margin_pct: None,
    }
}

/// Two lots of one item, one simplified invoice demanding 150 units:
/// the demand spans both lots as two separate lines at their own
/// prices, never merged.
#[test]
fn two_lots_one_item_one_invoice() {
    let mut inventory = load(vec![
        row(
            "A",
            "X",
            Classification::NonExciseOutside,
            1,
            100,
            dec!(8.00),
            dec!(10.00),
        ),
        row(
            "B",
            "X",
            Classification::NonExciseOutside,
            2,
            100,
            dec!(9.00),
            dec!(12.00),
        ),
    ]);

    let lines = lines_for_item_quantity(
        &mut inventory,
        "X",
        150,
        date(2024, 2, 1),
        PricingPolicy::LotPrice,
    )
    .unwrap();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].lot_id, "A:X");
    assert_eq!(lines[0].quantity, 100);
    assert_eq!(lines[0].unit_price_ex_vat, dec!(10.00));
    assert_eq!(lines[0].line_subtotal, dec!(1000.00));
    assert_eq!(lines[1].lot_id, "B:X");
    assert_eq!(lines[1].quantity, 50);
    assert_eq!(lines[1].unit_price_ex_vat, dec!(12.00));
    assert_eq!(lines[1].line_subtotal, dec!(600.00));

    let invoice = Invoice::new(
        InvoiceKind::Simplified,
        calendar::datetime_at(date(2024, 2, 1), 12, 30),
        Buyer::Cash,
        lines,
        dec!(0.15),
    );
    assert_eq!(invoice.subtotal, dec!(1600.00));
    assert_eq!(invoice.vat_amount, dec!(240.00));
    assert_eq!(invoice.total, dec!(1840.00));

    assert_eq!(inventory.lot("A:X").unwrap().qty_remaining, 0);
    assert_eq!(inventory.lot("B:X").unwrap().qty_remaining, 50);
}

/// Demanding more than both lots hold leaves both untouched.
#[test]
fn overdemand_rolls_back_cleanly() {
    let mut inventory = load(vec![
        row(
            "A",
            "X",
            Classification::NonExciseOutside,
            1,
            100,
            dec!(8.00),
            dec!(10.00),
        ),
        row(
            "B",
            "X",
            Classification::NonExciseOutside,
            2,
            100,
            dec!(9.00),
            dec!(12.00),
        ),
    ]);
    assert!(lines_for_item_quantity(
        &mut inventory,
        "X",
        250,
        date(2024, 2, 1),
        PricingPolicy::LotPrice,
    )
    .is_err());
    assert_eq!(inventory.lot("A:X").unwrap().qty_remaining, 100);
    assert_eq!(inventory.lot("B:X").unwrap().qty_remaining, 100);
}

/// Composed baskets stay inside stock: the composer never oversells,
/// and every deduction is reflected in the returned lines.
#[test]
fn composed_baskets_conserve_stock() {
    let mut inventory = load(vec![
        row(
            "A",
            "tea",
            Classification::NonExciseOutside,
            1,
            200,
            dec!(2.00),
            dec!(3.00),
        ),
        row(
            "B",
            "sugar",
            Classification::NonExciseInspection,
            1,
            200,
            dec!(1.50),
            dec!(2.50),
        ),
    ]);
    let config = GeneratorConfig {
        excise_exclusive_ratio: 0.0,
        ..Default::default()
    };
    let mut rng = ChaCha8Rng::seed_from_u64(13);
    let mut stats = RunStats::default();

    let mut sold_a = 0u32;
    let mut sold_b = 0u32;
    while let Some(basket) = compose(
        &mut inventory,
        &mut rng,
        &config,
        InvoiceKind::Simplified,
        date(2024, 2, 1),
        SizeHint::Amount(dec!(200.00)),
        &mut stats,
    ) {
        for line in &basket.lines {
            match line.lot_id.as_str() {
                "A:tea" => sold_a += line.quantity,
                "B:sugar" => sold_b += line.quantity,
                other => panic!("unexpected lot {other}"),
            }
        }
        if sold_a + sold_b >= 360 {
            break;
        }
    }

    assert!(sold_a <= 200);
    assert!(sold_b <= 200);
    assert_eq!(inventory.lot("A:tea").unwrap().qty_remaining, 200 - sold_a);
    assert_eq!(
        inventory.lot("B:sugar").unwrap().qty_remaining,
        200 - sold_b
    );
}
