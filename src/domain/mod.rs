//! Domain module
//!
//! Core domain types and business rules for constituted credits.

pub mod context;
pub mod credit;
pub mod error;
pub mod identifiers;
pub mod money;
pub mod validation;

pub use context::OperationContext;
pub use credit::{Credit, CreditDraft, CreditType};
pub use error::{DomainError, FaultKind, InvalidValueError, InvariantViolation};
pub use identifiers::{CreditNumber, NfseNumber, MAX_IDENTIFIER_LEN};
pub use money::{Money, Percentage};
pub use validation::{CreditValidationService, TOLERANCE};
