//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Coarse classification shared by every error in the crate.
///
/// Callers and operators react differently to each kind: validation faults
/// are never retried, duplicates are silent no-ops, transient faults are
/// retried through broker redelivery and fatal faults stop the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Validation,
    Duplicate,
    Transient,
    Fatal,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Validation => write!(f, "validation"),
            FaultKind::Duplicate => write!(f, "duplicate"),
            FaultKind::Transient => write!(f, "transient"),
            FaultKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// A primitive rejected by a value object factory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidValueError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must have at most {max} characters (got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: Decimal },

    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("{field} has an unrecognized value: {value}")]
    Unrecognized { field: &'static str, value: String },
}

/// A cross-field rule broken by an otherwise well-formed credit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("Constitution date {date} is in the future")]
    FutureConstitutionDate { date: NaiveDate },

    #[error("Tax amount must be greater than zero (got {value})")]
    NonPositiveTaxAmount { value: Decimal },

    #[error("Invalid calculation base: expected {expected:.2}, got {actual:.2}")]
    BaseCalculationMismatch { expected: Decimal, actual: Decimal },

    #[error("Invalid tax amount: expected {expected:.2}, got {actual:.2}")]
    TaxAmountMismatch { expected: Decimal, actual: Decimal },

    #[error("Deduction amount {deduction} exceeds billed amount {billed}")]
    DeductionExceedsBilled { billed: Decimal, deduction: Decimal },
}

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A primitive failed its value object rules
    #[error("Invalid value: {0}")]
    InvalidValue(#[from] InvalidValueError),

    /// A constructed credit broke a cross-field invariant
    #[error("Invalid credit: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl DomainError {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::InvalidValue(_) | Self::Invariant(_) => FaultKind::Validation,
        }
    }
}
