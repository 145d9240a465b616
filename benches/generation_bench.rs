use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use daftar::align::generate_ledger;
use daftar::config::GeneratorConfig;
use daftar::core::{money, CatalogRow, Classification, QuarterTarget};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn catalog() -> Vec<CatalogRow> {
    let prices = [
        "1.00", "2.35", "3.99", "4.00", "5.25", "7.99", "10.00", "12.50", "15.75", "21.30",
        "25.00", "31.75",
    ];
    prices
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let price: Decimal = raw.parse().unwrap();
            CatalogRow {
                customs_declaration_no: format!("CD-{:03}", i + 1),
                item_description: format!("Item {:02}", i + 1),
                classification: if i % 2 == 0 {
                    Classification::NonExciseInspection
                } else {
                    Classification::NonExciseOutside
                },
                import_date: date(2023, 12, 1) + Duration::days(i as i64),
                qty_imported: 200_000,
                unit_cost_ex_vat: money::round_half_up(price * dec!(0.70)),
                unit_price_ex_vat: price,
                margin_pct: None,
            }
        })
        .collect()
}

fn quarter() -> QuarterTarget {
    QuarterTarget {
        label: "Q1-2024".into(),
        period_start: date(2024, 1, 1),
        period_end: date(2024, 3, 31),
        sales_ex_vat: dec!(200000.00),
        vat_amount: dec!(30000.00),
        sales_inc_vat: dec!(230000.00),
        strict: true,
    }
}

fn bench_generate_quarter(c: &mut Criterion) {
    c.bench_function("generate_strict_quarter", |b| {
        b.iter(|| {
            let outcome = generate_ledger(
                black_box(catalog()),
                Vec::new(),
                Vec::new(),
                vec![quarter()],
                GeneratorConfig {
                    random_seed: 7,
                    ..Default::default()
                },
            )
            .unwrap();
            black_box(outcome.invoices.len())
        })
    });
}

criterion_group!(benches, bench_generate_quarter);
criterion_main!(benches);
