//! Integrate Credits Handler
//!
//! Validates a whole batch, then publishes each credit individually.
//! Nothing is published unless every item is valid.

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::messaging::CreditPublisher;

use super::validator::{CreditRequestValidator, ValidationErrors};
use super::{IntegrateCreditsCommand, IntegrateCreditsResult};

/// Handler for batch credit submissions
#[derive(Debug, Clone)]
pub struct IntegrateCreditsHandler {
    publisher: CreditPublisher,
    validator: CreditRequestValidator,
}

impl IntegrateCreditsHandler {
    pub fn new(publisher: CreditPublisher) -> Self {
        Self {
            publisher,
            validator: CreditRequestValidator::new(),
        }
    }

    /// Execute the integrate command
    ///
    /// Publishing stops at the first broker failure. Items published before
    /// it stay published; the caller retries the batch and the processor's
    /// idempotency absorbs the repeats.
    pub async fn execute(
        &self,
        command: IntegrateCreditsCommand,
        context: &OperationContext,
    ) -> Result<IntegrateCreditsResult, AppError> {
        if command.credits.is_empty() {
            return Err(AppError::InvalidRequest(
                "At least one credit is required".to_string(),
            ));
        }

        let mut errors = ValidationErrors::default();
        for (index, credit) in command.credits.iter().enumerate() {
            if let Err(item_errors) = self.validator.validate(credit) {
                errors.extend_indexed(index, item_errors);
            }
        }

        if !errors.is_empty() {
            tracing::info!(
                correlation_id = ?context.correlation_id,
                violations = errors.len(),
                details = %errors.summary(),
                "Credit batch rejected"
            );
            return Err(AppError::Validation(errors));
        }

        let mut message_ids = Vec::with_capacity(command.credits.len());
        for credit in &command.credits {
            let message_id = self.publisher.publish_credit(credit, context).await?;
            message_ids.push(message_id);
        }

        tracing::info!(
            correlation_id = ?context.correlation_id,
            published = message_ids.len(),
            "Credit batch published"
        );

        Ok(IntegrateCreditsResult {
            success: true,
            published: message_ids.len(),
            message_ids,
        })
    }
}
