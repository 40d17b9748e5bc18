//! Broker seams
//!
//! Traits separating the pipeline from a concrete broker. The consumer only
//! sees [`MessageBroker`], [`Subscription`] and [`Delivery`]; publishers only
//! see [`MessagePublisher`].

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::FaultKind;

use super::message::{DeadLetterReason, Envelope};

/// Broker error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Connection or transport failure; retrying later may succeed
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// Missing or invalid broker setup; retrying will not help
    #[error("Broker configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The circuit breaker rejected the attempt without contacting the broker
    #[error("Circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },
}

impl BrokerError {
    pub fn kind(&self) -> FaultKind {
        match self {
            BrokerError::Transport(_) | BrokerError::CircuitOpen { .. } => FaultKind::Transient,
            BrokerError::Configuration(_) | BrokerError::Serialization(_) => FaultKind::Fatal,
        }
    }

    /// Whether this error counts as a failure against the circuit breaker
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transport(_))
    }
}

/// Hands envelopes to the broker
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish and wait for the broker to accept the message.
    async fn send(&self, envelope: Envelope) -> Result<(), BrokerError>;
}

/// Opens subscriptions on the credit queue
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// A long-lived subscription handle
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` means the subscription ended.
    async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>, BrokerError>>;

    /// Release the subscription
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// A single delivered message awaiting settlement.
///
/// Exactly one of `complete`, `abandon` or `dead_letter` is called per
/// delivery.
#[async_trait]
pub trait Delivery: Send {
    fn message_id(&self) -> &str;

    fn body(&self) -> &[u8];

    /// How many times this message has been delivered, starting at 1
    fn delivery_count(&self) -> u32;

    /// Whether the broker gives up on this message after this delivery.
    ///
    /// An abandon on the last delivery would drop the message, so the
    /// consumer dead-letters it instead.
    fn is_last_delivery(&self) -> bool;

    /// Remove the message from the queue
    async fn complete(&mut self) -> Result<(), BrokerError>;

    /// Return the message to the queue for redelivery
    async fn abandon(&mut self) -> Result<(), BrokerError>;

    /// Move the message to the dead-letter sink
    async fn dead_letter(
        &mut self,
        reason: DeadLetterReason,
        description: &str,
    ) -> Result<(), BrokerError>;
}
