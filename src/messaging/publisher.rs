//! Credit Publisher
//!
//! Serializes validated submissions and audit records and hands them to the
//! broker. No retry happens here; a failed publish is returned to the caller.

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::QueryAuditEvent;
use crate::domain::OperationContext;
use crate::handlers::CreditPayload;

use super::{BrokerError, Envelope, MessageKind, MessagePublisher};

#[derive(Clone)]
pub struct CreditPublisher {
    publisher: Arc<dyn MessagePublisher>,
}

impl CreditPublisher {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }

    /// Publish one credit payload and return its message id.
    pub async fn publish_credit(
        &self,
        payload: &CreditPayload,
        context: &OperationContext,
    ) -> Result<Uuid, BrokerError> {
        let envelope = Envelope::json(MessageKind::Credit, payload)?.with_context(context);
        let message_id = envelope.message_id;

        self.publisher.send(envelope).await?;

        tracing::info!(
            message_id = %message_id,
            credit_number = %payload.credit_number,
            correlation_id = ?context.correlation_id,
            "Credit published"
        );
        Ok(message_id)
    }

    /// Publish a query-audit record and return its message id.
    pub async fn publish_audit(
        &self,
        event: &QueryAuditEvent,
        context: &OperationContext,
    ) -> Result<Uuid, BrokerError> {
        let envelope = Envelope::json(MessageKind::QueryAudit, event)?.with_context(context);
        let message_id = envelope.message_id;

        self.publisher.send(envelope).await?;

        tracing::debug!(
            message_id = %message_id,
            query_type = event.query_type.as_str(),
            reference = %event.reference_number,
            "Query audit published"
        );
        Ok(message_id)
    }
}

impl std::fmt::Debug for CreditPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditPublisher").finish_non_exhaustive()
    }
}
