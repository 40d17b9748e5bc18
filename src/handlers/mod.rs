//! Command Handlers module
//!
//! Handlers that orchestrate the submission, processing and read paths.

mod commands;
mod integrate_handler;
mod process_handler;
mod query_handler;
pub mod validator;


pub use commands::*;
pub use integrate_handler::IntegrateCreditsHandler;
pub use process_handler::ProcessCreditHandler;
pub use query_handler::CreditQueryHandler;
pub use validator::{CreditRequestValidator, FieldError, ValidationErrors};
