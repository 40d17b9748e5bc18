//! NATS JetStream broker
//!
//! One stream binds the credit, audit and dead-letter subjects. Credits are
//! consumed through a durable pull consumer with explicit acks and at most
//! one unacknowledged message. Abandoned messages are nak'd with a delay, and
//! the server stops redelivering after `max_deliveries`.

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, AckKind};
use async_nats::{Client, ConnectErrorKind, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::BrokerSettings;

use super::{
    BrokerError, DeadLetterReason, Delivery, Envelope, MessageBroker, MessageKind,
    MessagePublisher, Subscription,
};

pub const HEADER_MESSAGE_ID: &str = "Nats-Msg-Id";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CORRELATION_ID: &str = "X-Correlation-Id";
pub const HEADER_DEAD_LETTER_REASON: &str = "Dead-Letter-Reason";
pub const HEADER_DEAD_LETTER_DESCRIPTION: &str = "Dead-Letter-Description";
pub const HEADER_ORIGINAL_MESSAGE_ID: &str = "Original-Message-Id";

/// Header values end at a line break; collapse CR and LF into spaces.
fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn transport<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> BrokerError {
    move |e| BrokerError::Transport(format!("{}: {}", context, e))
}

/// Broker backed by a NATS server with JetStream enabled
#[derive(Debug)]
pub struct NatsBroker {
    client: Client,
    jetstream: jetstream::Context,
    settings: BrokerSettings,
    stream_ready: OnceCell<()>,
}

impl NatsBroker {
    /// Create the client. The TCP connection is established in the
    /// background, so an unreachable server surfaces later as transport
    /// errors on publish or subscribe.
    pub async fn connect(settings: BrokerSettings) -> Result<Self, BrokerError> {
        if settings.url.trim().is_empty() {
            return Err(BrokerError::Configuration("broker URL is empty".into()));
        }

        let client = async_nats::ConnectOptions::new()
            .name("credit_ingest")
            .retry_on_initial_connect()
            .connect(settings.url.as_str())
            .await
            .map_err(|e| match e.kind() {
                ConnectErrorKind::ServerParse => {
                    BrokerError::Configuration(format!("invalid broker URL: {}", e))
                }
                _ => BrokerError::Transport(format!("failed to connect: {}", e)),
            })?;

        let jetstream = jetstream::new(client.clone());

        tracing::info!(
            url = %settings.url,
            stream = %settings.stream,
            subject = %settings.subject,
            "NATS client created"
        );

        Ok(Self {
            client,
            jetstream,
            settings,
            stream_ready: OnceCell::new(),
        })
    }

    fn subject_for(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::Credit => &self.settings.subject,
            MessageKind::QueryAudit => &self.settings.audit_subject,
        }
    }

    async fn ensure_stream(&self) -> Result<(), BrokerError> {
        self.stream_ready
            .get_or_try_init(|| async {
                self.jetstream
                    .get_or_create_stream(jetstream::stream::Config {
                        name: self.settings.stream.clone(),
                        subjects: vec![
                            self.settings.subject.clone(),
                            self.settings.audit_subject.clone(),
                            self.settings.dead_letter_subject.clone(),
                        ],
                        storage: jetstream::stream::StorageType::File,
                        ..Default::default()
                    })
                    .await
                    .map_err(transport("failed to create stream"))?;
                Ok::<_, BrokerError>(())
            })
            .await?;
        Ok(())
    }

    /// Flush pending publishes before shutdown.
    pub async fn flush(&self) -> Result<(), BrokerError> {
        self.client.flush().await.map_err(transport("failed to flush"))
    }
}

#[async_trait]
impl MessagePublisher for NatsBroker {
    async fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        self.ensure_stream().await?;

        let message_id = envelope.message_id.to_string();
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_MESSAGE_ID, message_id.as_str());
        headers.insert(HEADER_CONTENT_TYPE, envelope.content_type);
        if let Some(correlation_id) = envelope.correlation_id {
            headers.insert(HEADER_CORRELATION_ID, correlation_id.to_string().as_str());
        }

        let subject = self.subject_for(envelope.kind).to_string();
        self.jetstream
            .publish_with_headers(subject, headers, envelope.body)
            .await
            .map_err(transport("failed to publish"))?
            .await
            .map_err(transport("publish not acknowledged"))?;

        Ok(())
    }
}

#[async_trait]
impl MessageBroker for NatsBroker {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, BrokerError> {
        self.ensure_stream().await?;

        let stream = self
            .jetstream
            .get_stream(&self.settings.stream)
            .await
            .map_err(transport("failed to get stream"))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.settings.consumer_name,
                pull::Config {
                    durable_name: Some(self.settings.consumer_name.clone()),
                    filter_subject: self.settings.subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: 1,
                    max_deliver: i64::from(self.settings.max_deliveries),
                    ..Default::default()
                },
            )
            .await
            .map_err(transport("failed to create consumer"))?;

        let messages = consumer
            .messages()
            .await
            .map_err(transport("failed to open message stream"))?;

        tracing::info!(
            consumer = %self.settings.consumer_name,
            subject = %self.settings.subject,
            "Subscribed to credit subject"
        );

        Ok(Box::new(NatsSubscription {
            messages: Some(messages),
            jetstream: self.jetstream.clone(),
            dead_letter_subject: self.settings.dead_letter_subject.clone(),
            max_deliveries: self.settings.max_deliveries,
            redelivery_delay: self.settings.redelivery_delay,
        }))
    }
}

struct NatsSubscription {
    messages: Option<pull::Stream>,
    jetstream: jetstream::Context,
    dead_letter_subject: String,
    max_deliveries: u32,
    redelivery_delay: Duration,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>, BrokerError>> {
        let messages = self.messages.as_mut()?;

        match messages.next().await? {
            Ok(message) => {
                let info = message.info().ok();
                let delivery_count = info
                    .as_ref()
                    .map(|info| u32::try_from(info.delivered).unwrap_or(u32::MAX))
                    .unwrap_or(1);
                let message_id = message
                    .headers
                    .as_ref()
                    .and_then(|h| h.get(HEADER_MESSAGE_ID))
                    .map(|v| v.as_str().to_string())
                    .or_else(|| info.as_ref().map(|info| format!("seq-{}", info.stream_sequence)))
                    .unwrap_or_default();

                Some(Ok(Box::new(NatsDelivery {
                    message_id,
                    body: message.payload.clone(),
                    delivery_count,
                    max_deliveries: self.max_deliveries,
                    redelivery_delay: self.redelivery_delay,
                    message,
                    jetstream: self.jetstream.clone(),
                    dead_letter_subject: self.dead_letter_subject.clone(),
                })))
            }
            Err(e) => Some(Err(BrokerError::Transport(format!(
                "message stream error: {}",
                e
            )))),
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        // Dropping the pull stream stops outstanding pull requests; the
        // durable consumer stays on the server for the next start.
        self.messages = None;
        Ok(())
    }
}

struct NatsDelivery {
    message_id: String,
    body: Bytes,
    delivery_count: u32,
    max_deliveries: u32,
    redelivery_delay: Duration,
    message: jetstream::Message,
    jetstream: jetstream::Context,
    dead_letter_subject: String,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    fn is_last_delivery(&self) -> bool {
        self.delivery_count >= self.max_deliveries
    }

    async fn complete(&mut self) -> Result<(), BrokerError> {
        self.message.ack().await.map_err(transport("failed to ack"))
    }

    async fn abandon(&mut self) -> Result<(), BrokerError> {
        self.message
            .ack_with(AckKind::Nak(Some(self.redelivery_delay)))
            .await
            .map_err(transport("failed to nak"))
    }

    async fn dead_letter(
        &mut self,
        reason: DeadLetterReason,
        description: &str,
    ) -> Result<(), BrokerError> {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_DEAD_LETTER_REASON, reason.as_str());
        headers.insert(
            HEADER_DEAD_LETTER_DESCRIPTION,
            header_safe(description).as_str(),
        );
        headers.insert(HEADER_ORIGINAL_MESSAGE_ID, self.message_id.as_str());

        self.jetstream
            .publish_with_headers(self.dead_letter_subject.clone(), headers, self.body.clone())
            .await
            .map_err(transport("failed to publish dead letter"))?
            .await
            .map_err(transport("dead letter not acknowledged"))?;

        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(transport("failed to terminate"))
    }
}
