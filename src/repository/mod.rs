//! Credit Repository
//!
//! Persistence contract for constituted credits. Credits are append-only:
//! there is no update or delete.

mod error;
mod memory;
mod postgres;

pub use error::RepositoryError;
pub use memory::InMemoryCreditRepository;
pub use postgres::PgCreditRepository;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Credit, CreditNumber, NfseNumber};

/// Storage for credits.
///
/// Every operation takes a cancellation token; a cancelled operation fails
/// with [`RepositoryError::Cancelled`].
#[async_trait]
pub trait CreditRepository: Send + Sync {
    /// Insert a new credit and return its storage-assigned id.
    ///
    /// Fails with [`RepositoryError::DuplicateCreditNumber`] when the credit
    /// number is already stored.
    async fn add(&self, credit: &Credit, cancel: &CancellationToken) -> Result<i64, RepositoryError>;

    async fn find_by_credit_number(
        &self,
        credit_number: &CreditNumber,
        cancel: &CancellationToken,
    ) -> Result<Option<Credit>, RepositoryError>;

    /// All credits for an NFS-e, newest constitution date first.
    async fn find_by_nfse_number(
        &self,
        nfse_number: &NfseNumber,
        cancel: &CancellationToken,
    ) -> Result<Vec<Credit>, RepositoryError>;

    async fn exists(
        &self,
        credit_number: &CreditNumber,
        cancel: &CancellationToken,
    ) -> Result<bool, RepositoryError>;
}

/// Race a repository future against a cancellation token.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RepositoryError>
where
    F: std::future::Future<Output = Result<T, RepositoryError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepositoryError::Cancelled),
        result = operation => result,
    }
}
