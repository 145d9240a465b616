//! # daftar
//!
//! Retrospective VAT sales-ledger synthesis: given a lot-addressed
//! import catalog, quarterly VAT-return totals, a roster of B2B
//! purchases and an official-holiday calendar, reconstruct an invoice
//! stream — simplified (cash) and tax (B2B) — whose arithmetic exactly
//! reconciles to the declared quarterly totals, never oversells a lot,
//! and never sells below cost.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating
//! point. All randomness routes through one seeded ChaCha generator;
//! identical inputs and seed produce a byte-identical ledger.
//!
//! ## Quick Start
//!
//! ```no_run
//! use daftar::align::generate_ledger;
//! use daftar::config::GeneratorConfig;
//!
//! # let (catalog, customers, holidays, quarters) = (vec![], vec![], vec![], vec![]);
//! let config = GeneratorConfig {
//!     random_seed: 42,
//!     ..Default::default()
//! };
//! let outcome = generate_ledger(catalog, customers, holidays, quarters, config)?;
//! for summary in &outcome.quarters {
//!     println!("{}: {} invoices, variance {}", summary.label,
//!         summary.invoice_count, summary.variance_inc_vat);
//! }
//! # Ok::<(), daftar::core::DaftarError>(())
//! ```
//!
//! ## Pipeline
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`core`] | Money/calendar primitives, entity model, numbering |
//! | [`inventory`] | Lot-addressed FIFO store with activation gating |
//! | [`basket`] | Lot/quantity selection under the mixing rules |
//! | [`simulate`] | Calendar-shaped daily cash-invoice stream |
//! | [`b2b`] | Exact-amount tax invoices for recorded purchases |
//! | [`align`] | Two-phase quarterly convergence orchestration |
//! | [`refine`] | ±1-quantity residual closing |
//! | [`validate`] | Post-run invariant checks |
//! | [`report`] | Run summary, writer records, QR payloads |
//!
//! Excel readers, PDF/receipt rendering, QR image encoding and CLI
//! wrappers are external collaborators; this crate only defines the
//! records they exchange with the core.

pub mod align;
pub mod b2b;
pub mod basket;
pub mod config;
pub mod core;
pub mod inventory;
pub mod refine;
pub mod report;
pub mod simulate;
pub mod validate;

pub use crate::align::{generate_ledger, RunOutcome};
pub use crate::config::{GeneratorConfig, PricingPolicy, SellerIdentity};
pub use crate::core::{
    Buyer, CatalogRow, Classification, Customer, DaftarError, Holiday, Invoice, InvoiceKind,
    InvoiceLine, Lot, QuarterTarget, Severity, ValidationFinding,
};
