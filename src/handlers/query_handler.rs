//! Credit Query Handler
//!
//! Read path over stored credits. Every query is audited by publishing a
//! query-audit event; a failed audit publish is logged and does not fail
//! the read.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::audit::QueryAuditEvent;
use crate::domain::{CreditNumber, DomainError, NfseNumber, OperationContext};
use crate::error::AppError;
use crate::messaging::CreditPublisher;
use crate::repository::CreditRepository;

use super::CreditPayload;

/// Handler for credit read queries
#[derive(Clone)]
pub struct CreditQueryHandler {
    repository: Arc<dyn CreditRepository>,
    publisher: CreditPublisher,
    cancel: CancellationToken,
}

impl CreditQueryHandler {
    /// `cancel` aborts in-flight reads, typically on shutdown.
    pub fn new(
        repository: Arc<dyn CreditRepository>,
        publisher: CreditPublisher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            repository,
            publisher,
            cancel,
        }
    }

    /// All credits for an NFS-e, newest constitution date first
    pub async fn find_by_nfse_number(
        &self,
        nfse_number: &str,
        context: &OperationContext,
    ) -> Result<Vec<CreditPayload>, AppError> {
        let nfse_number = NfseNumber::new(nfse_number).map_err(DomainError::from)?;

        let credits = self
            .repository
            .find_by_nfse_number(&nfse_number, &self.cancel)
            .await?;

        self.audit(QueryAuditEvent::by_nfse(nfse_number.as_str()), context)
            .await;

        Ok(credits.iter().map(CreditPayload::from).collect())
    }

    /// A single credit by its number
    pub async fn find_by_credit_number(
        &self,
        credit_number: &str,
        context: &OperationContext,
    ) -> Result<CreditPayload, AppError> {
        let credit_number = CreditNumber::new(credit_number).map_err(DomainError::from)?;

        let credit = self
            .repository
            .find_by_credit_number(&credit_number, &self.cancel)
            .await?;

        self.audit(
            QueryAuditEvent::by_credit_number(credit_number.as_str()),
            context,
        )
        .await;

        credit
            .as_ref()
            .map(CreditPayload::from)
            .ok_or_else(|| AppError::CreditNotFound(credit_number.to_string()))
    }

    async fn audit(&self, event: QueryAuditEvent, context: &OperationContext) {
        if let Err(e) = self.publisher.publish_audit(&event, context).await {
            tracing::warn!(
                query_type = event.query_type.as_str(),
                reference = %event.reference_number,
                error = %e,
                "Failed to publish query audit event"
            );
        }
    }
}
