//! Broker messages
//!
//! The envelope wrapping every published body, and the reason codes used
//! when a delivery is moved to the dead-letter sink.

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::handlers::CreditPayload;

use super::BrokerError;

/// Content type of every body this crate publishes
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// What an envelope carries; the broker routes on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A candidate credit for the processor
    Credit,
    /// A read-path audit record
    QueryAudit,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Credit => "credit",
            MessageKind::QueryAudit => "query_audit",
        }
    }
}

/// A body ready for the broker, with its generated message id.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub content_type: &'static str,
    pub kind: MessageKind,
    pub body: Bytes,
}

impl Envelope {
    /// Serialize `value` as JSON under a fresh message id.
    pub fn json<T: Serialize>(kind: MessageKind, value: &T) -> Result<Self, BrokerError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;

        Ok(Self {
            message_id: Uuid::new_v4(),
            correlation_id: None,
            content_type: CONTENT_TYPE_JSON,
            kind,
            body: Bytes::from(body),
        })
    }

    pub fn with_context(mut self, context: &OperationContext) -> Self {
        self.correlation_id = context.correlation_id;
        self
    }
}

/// Why a delivery was moved to the dead-letter sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// The body could not be decoded into a credit payload
    InvalidMessage,
    /// The payload decoded but the credit broke a domain rule
    InvalidCredit,
    /// Transient failures persisted through every allowed delivery
    MaxDeliveryCountExceeded,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::InvalidMessage => "InvalidMessage",
            DeadLetterReason::InvalidCredit => "InvalidCredit",
            DeadLetterReason::MaxDeliveryCountExceeded => "MaxDeliveryCountExceeded",
        }
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode a delivered body into a credit payload.
///
/// Anything that is not a JSON object of the expected shape fails,
/// including a bare `null`.
pub fn decode_credit(body: &[u8]) -> Result<CreditPayload, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_json() {
        let context = OperationContext::new().with_correlation_id(Uuid::new_v4());
        let envelope = Envelope::json(MessageKind::Credit, &CreditPayload::default())
            .unwrap()
            .with_context(&context);

        assert_eq!(envelope.content_type, "application/json");
        assert_eq!(envelope.correlation_id, context.correlation_id);
        assert!(decode_credit(&envelope.body).is_ok());
    }

    #[test]
    fn test_fresh_message_id_per_envelope() {
        let a = Envelope::json(MessageKind::Credit, &CreditPayload::default()).unwrap();
        let b = Envelope::json(MessageKind::Credit, &CreditPayload::default()).unwrap();
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_credit(b"not json").is_err());
        assert!(decode_credit(b"null").is_err());
        assert!(decode_credit(b"[1, 2]").is_err());
        assert!(decode_credit(br#"{"valorIssqn": "abc"}"#).is_err());
    }

    #[test]
    fn test_dead_letter_reason_codes() {
        assert_eq!(DeadLetterReason::InvalidMessage.to_string(), "InvalidMessage");
        assert_eq!(DeadLetterReason::InvalidCredit.as_str(), "InvalidCredit");
        assert_eq!(
            DeadLetterReason::MaxDeliveryCountExceeded.as_str(),
            "MaxDeliveryCountExceeded"
        );
    }
}
