//! In-memory credit repository
//!
//! Used by tests and local runs without a database. Keyed by credit number,
//! so the uniqueness backstop holds the same way the Postgres index does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::domain::{Credit, CreditNumber, NfseNumber};

use super::{cancellable, CreditRepository, RepositoryError};

#[derive(Debug, Default)]
pub struct InMemoryCreditRepository {
    credits: RwLock<HashMap<CreditNumber, Credit>>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
}

impl InMemoryCreditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored credits
    pub async fn len(&self) -> usize {
        self.credits.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.credits.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CreditRepository for InMemoryCreditRepository {
    async fn add(&self, credit: &Credit, cancel: &CancellationToken) -> Result<i64, RepositoryError> {
        cancellable(cancel, async {
            self.check_available()?;

            let mut credits = self.credits.write().await;
            if credits.contains_key(credit.credit_number()) {
                return Err(RepositoryError::DuplicateCreditNumber {
                    credit_number: credit.credit_number().to_string(),
                });
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            credits.insert(credit.credit_number().clone(), credit.clone().with_id(id));
            Ok::<_, RepositoryError>(id)
        })
        .await
    }

    async fn find_by_credit_number(
        &self,
        credit_number: &CreditNumber,
        cancel: &CancellationToken,
    ) -> Result<Option<Credit>, RepositoryError> {
        cancellable(cancel, async {
            self.check_available()?;
            Ok::<_, RepositoryError>(self.credits.read().await.get(credit_number).cloned())
        })
        .await
    }

    async fn find_by_nfse_number(
        &self,
        nfse_number: &NfseNumber,
        cancel: &CancellationToken,
    ) -> Result<Vec<Credit>, RepositoryError> {
        cancellable(cancel, async {
            self.check_available()?;

            let mut found: Vec<Credit> = self
                .credits
                .read()
                .await
                .values()
                .filter(|c| c.nfse_number() == nfse_number)
                .cloned()
                .collect();

            found.sort_by(|a, b| {
                b.constitution_date()
                    .cmp(&a.constitution_date())
                    .then_with(|| b.id().cmp(&a.id()))
            });
            Ok::<_, RepositoryError>(found)
        })
        .await
    }

    async fn exists(
        &self,
        credit_number: &CreditNumber,
        cancel: &CancellationToken,
    ) -> Result<bool, RepositoryError> {
        cancellable(cancel, async {
            self.check_available()?;
            Ok::<_, RepositoryError>(self.credits.read().await.contains_key(credit_number))
        })
        .await
    }
}
