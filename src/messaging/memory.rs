//! In-process broker
//!
//! A queue with the same settlement semantics as the real broker: abandoned
//! messages are redelivered after a delay up to a delivery limit, completed
//! ones are removed and dead-lettered ones are recorded with their reason.
//! Used by tests and local runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    BrokerError, DeadLetterReason, Delivery, Envelope, MessageBroker, MessageKind,
    MessagePublisher, Subscription,
};

/// A message moved to the dead-letter sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub message_id: String,
    pub body: Bytes,
    pub reason: DeadLetterReason,
    pub description: String,
}

/// Deliveries allowed per message before the consumer must give up
pub const DEFAULT_MAX_DELIVERIES: u32 = 10;

/// Delay before an abandoned message becomes visible again
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct QueuedMessage {
    message_id: String,
    body: Bytes,
    deliveries: u32,
    visible_at: Instant,
}

impl QueuedMessage {
    fn fresh(message_id: String, body: Bytes) -> Self {
        Self {
            message_id,
            body,
            deliveries: 0,
            visible_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    queue: Mutex<VecDeque<QueuedMessage>>,
    max_deliveries: AtomicU32,
    redelivery_delay_ms: AtomicU64,
    available: Notify,
    published: Mutex<Vec<Envelope>>,
    completed: Mutex<Vec<String>>,
    dead_letters: Mutex<Vec<DeadLetterRecord>>,
    abandoned: AtomicU64,
    subscribe_attempts: AtomicU32,
    failing_subscribes: AtomicU32,
    publish_unavailable: AtomicBool,
    generation: AtomicU64,
}

impl Inner {
    async fn enqueue(&self, message: QueuedMessage) {
        self.queue.lock().await.push_back(message);
        self.available.notify_one();
    }
}

/// In-process broker; clones share the same queue.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let broker = Self {
            inner: Arc::new(Inner::default()),
        };
        broker.set_redelivery(DEFAULT_MAX_DELIVERIES, DEFAULT_REDELIVERY_DELAY);
        broker
    }

    /// Change the delivery limit and the delay applied to abandoned messages.
    pub fn set_redelivery(&self, max_deliveries: u32, delay: Duration) {
        self.inner
            .max_deliveries
            .store(max_deliveries.max(1), Ordering::SeqCst);
        self.inner
            .redelivery_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Put a raw body on the credit queue, bypassing the publisher.
    pub async fn deliver_raw(&self, body: impl Into<Bytes>) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.inner
            .enqueue(QueuedMessage::fresh(message_id.clone(), body.into()))
            .await;
        message_id
    }

    /// Make the next `count` subscribe attempts fail with a transport error.
    pub fn fail_next_subscribes(&self, count: u32) {
        self.inner.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// Make every publish fail with a transport error.
    pub fn set_publish_unavailable(&self, unavailable: bool) {
        self.inner
            .publish_unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// End every open subscription, as if the server dropped them.
    pub fn end_subscriptions(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.available.notify_waiters();
    }

    pub fn subscribe_attempts(&self) -> u32 {
        self.inner.subscribe_attempts.load(Ordering::SeqCst)
    }

    pub fn abandoned_count(&self) -> u64 {
        self.inner.abandoned.load(Ordering::SeqCst)
    }

    pub async fn published(&self) -> Vec<Envelope> {
        self.inner.published.lock().await.clone()
    }

    pub async fn published_of(&self, kind: MessageKind) -> Vec<Envelope> {
        self.inner
            .published
            .lock()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn completed(&self) -> Vec<String> {
        self.inner.completed.lock().await.clone()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.inner.dead_letters.lock().await.clone()
    }

    pub async fn pending(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Completed plus dead-lettered deliveries
    pub async fn settled_count(&self) -> usize {
        self.inner.completed.lock().await.len() + self.inner.dead_letters.lock().await.len()
    }

    /// Poll until at least `count` deliveries are settled or `timeout` passes.
    pub async fn wait_until_settled(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.settled_count().await >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        if self.inner.publish_unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport("in-memory broker unavailable".into()));
        }

        if envelope.kind == MessageKind::Credit {
            self.inner
                .enqueue(QueuedMessage::fresh(
                    envelope.message_id.to_string(),
                    envelope.body.clone(),
                ))
                .await;
        }

        self.inner.published.lock().await.push(envelope);
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, BrokerError> {
        self.inner.subscribe_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self.inner.failing_subscribes.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner
                .failing_subscribes
                .store(failing - 1, Ordering::SeqCst);
            return Err(BrokerError::Transport("connection refused".into()));
        }

        Ok(Box::new(InMemorySubscription {
            inner: self.inner.clone(),
            generation: self.inner.generation.load(Ordering::SeqCst),
            closed: false,
        }))
    }
}

struct InMemorySubscription {
    inner: Arc<Inner>,
    generation: u64,
    closed: bool,
}

impl InMemorySubscription {
    fn ended(&self) -> bool {
        self.closed || self.inner.generation.load(Ordering::SeqCst) != self.generation
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>, BrokerError>> {
        loop {
            let notified = self.inner.available.notified();

            if self.ended() {
                return None;
            }

            let next_visible = {
                let mut queue = self.inner.queue.lock().await;
                let now = Instant::now();

                if let Some(position) = queue.iter().position(|m| m.visible_at <= now) {
                    if let Some(mut message) = queue.remove(position) {
                        message.deliveries += 1;
                        return Some(Ok(Box::new(InMemoryDelivery {
                            inner: self.inner.clone(),
                            message,
                        })));
                    }
                }

                queue.iter().map(|m| m.visible_at).min()
            };

            match next_visible {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.closed = true;
        Ok(())
    }
}

struct InMemoryDelivery {
    inner: Arc<Inner>,
    message: QueuedMessage,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message_id(&self) -> &str {
        &self.message.message_id
    }

    fn body(&self) -> &[u8] {
        &self.message.body
    }

    fn delivery_count(&self) -> u32 {
        self.message.deliveries
    }

    fn is_last_delivery(&self) -> bool {
        self.message.deliveries >= self.inner.max_deliveries.load(Ordering::SeqCst)
    }

    async fn complete(&mut self) -> Result<(), BrokerError> {
        self.inner
            .completed
            .lock()
            .await
            .push(self.message.message_id.clone());
        Ok(())
    }

    async fn abandon(&mut self) -> Result<(), BrokerError> {
        self.inner.abandoned.fetch_add(1, Ordering::SeqCst);

        let delay = Duration::from_millis(self.inner.redelivery_delay_ms.load(Ordering::SeqCst));
        let mut message = self.message.clone();
        message.visible_at = Instant::now() + delay;
        self.inner.enqueue(message).await;
        Ok(())
    }

    async fn dead_letter(
        &mut self,
        reason: DeadLetterReason,
        description: &str,
    ) -> Result<(), BrokerError> {
        self.inner.dead_letters.lock().await.push(DeadLetterRecord {
            message_id: self.message.message_id.clone(),
            body: self.message.body.clone(),
            reason,
            description: description.to_string(),
        });
        Ok(())
    }
}
