//! Process Credit Handler
//!
//! Applies one delivered credit to the store. Idempotent: a credit number
//! that is already stored is acknowledged without writing.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::domain::{Credit, CreditDraft, CreditNumber, CreditValidationService, DomainError};
use crate::error::AppError;
use crate::repository::CreditRepository;

use super::{ProcessCreditCommand, ProcessOutcome};

/// Handler for delivered credit messages
pub struct ProcessCreditHandler {
    repository: Arc<dyn CreditRepository>,
}

impl ProcessCreditHandler {
    pub fn new(repository: Arc<dyn CreditRepository>) -> Self {
        Self { repository }
    }

    /// Execute the process command
    ///
    /// Domain faults come back as [`AppError::Domain`] and are permanent for
    /// this message. Repository faults come back as [`AppError::Repository`].
    pub async fn execute(
        &self,
        command: ProcessCreditCommand,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, AppError> {
        let payload = &command.payload;
        let credit_number =
            CreditNumber::new(&payload.credit_number).map_err(DomainError::from)?;

        if self.repository.exists(&credit_number, cancel).await? {
            tracing::debug!(
                credit_number = %credit_number,
                message_id = ?command.message_id,
                "Credit already exists (idempotent redelivery)"
            );
            return Ok(ProcessOutcome::AlreadyExists);
        }

        let draft = CreditDraft::try_from(payload)?;
        let credit = Credit::create(draft)?;
        CreditValidationService::validate_consistency(&credit, Utc::now().date_naive())
            .map_err(DomainError::from)?;

        match self.repository.add(&credit, cancel).await {
            Ok(id) => Ok(ProcessOutcome::Created { id }),
            // Lost a race with another writer; the stored row wins.
            Err(e) if e.is_duplicate() => Ok(ProcessOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}
