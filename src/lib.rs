//! credit_ingest Library
//!
//! Asynchronous ingestion of constituted ISSQN credits: validate and publish
//! at the HTTP boundary, consume and persist idempotently in the background.

pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
mod error;
pub mod handlers;
pub mod messaging;
pub mod repository;
pub mod worker;

pub use config::Config;
pub use domain::{Credit, CreditDraft, CreditType, DomainError, FaultKind, OperationContext};
pub use error::{AppError, ErrorResponse};
