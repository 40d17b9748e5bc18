//! Messaging module
//!
//! Publish/consume protocol between the submission boundary and the
//! credit processor.

mod broker;
mod circuit_breaker;
pub mod consumer;
mod memory;
pub mod message;
mod nats;
mod publisher;

pub use broker::{BrokerError, Delivery, MessageBroker, MessagePublisher, Subscription};
pub use circuit_breaker::{BrokerCircuitBreaker, CircuitState};
pub use consumer::{process_delivery, ConsumerState, CreditConsumer, Settlement};
pub use memory::{DeadLetterRecord, InMemoryBroker};
pub use message::{decode_credit, DeadLetterReason, Envelope, MessageKind, CONTENT_TYPE_JSON};
pub use nats::NatsBroker;
pub use publisher::CreditPublisher;
