use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during ledger synthesis.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DaftarError {
    /// A lot cannot satisfy a requested quantity.
    #[error("insufficient stock in lot {lot_id}: requested {requested}, available {available}")]
    InsufficientStock {
        lot_id: String,
        requested: u32,
        available: u32,
    },

    /// A lot id that is not in the catalog.
    #[error("unknown lot: {0}")]
    UnknownLot(String),

    /// A candidate line would sell below cost.
    #[error("lot {lot_id} would sell below cost: price {price} < cost {cost}")]
    ProfitabilityViolation {
        lot_id: String,
        price: Decimal,
        cost: Decimal,
    },

    /// A strict quarter could not be closed within tolerance after
    /// convergence, refinement and the balancing fallback.
    #[error("quarter {quarter}: declared total unreachable, residual {residual}")]
    AlignmentUnreachable { quarter: String, residual: Decimal },

    /// Post-run validators detected a broken invariant.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Upstream readers fed a malformed record. Fatal before generation.
    #[error("malformed input: {0}")]
    InputShape(String),

    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Severity of a post-run validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Breaks a run invariant; fails the run when it touches a strict quarter.
    Critical,
    /// Recorded in the report without failing the run.
    Warning,
}

/// A single validation finding with check name and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFinding {
    /// Name of the check that produced the finding (e.g. "price-fidelity").
    pub check: String,
    /// Human-readable description.
    pub message: String,
    pub severity: Severity,
}

impl std::fmt::Display for ValidationFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "warning",
        };
        write!(f, "[{}] {}: {}", tag, self.check, self.message)
    }
}

impl ValidationFinding {
    pub fn critical(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            message: message.into(),
            severity: Severity::Critical,
        }
    }

    pub fn warning(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}
