//! Credit Consumer
//!
//! Receives credit messages one at a time and settles each exactly once:
//! complete on success or duplicate, dead-letter on a permanent payload
//! fault, abandon on a transient infrastructure fault. A transient fault on
//! the broker's last allowed delivery dead-letters instead of abandoning.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//! Subscribing goes through the circuit breaker; processing does not.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::FaultKind;
use crate::handlers::{ProcessCreditCommand, ProcessCreditHandler, ProcessOutcome};

use super::message::decode_credit;
use super::{BrokerCircuitBreaker, BrokerError, DeadLetterReason, Delivery, MessageBroker, Subscription};

/// Pause after a stream error before pulling again
const STREAM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Consumer lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    Abandoned,
    DeadLettered(DeadLetterReason),
}

struct RunningConsumer {
    stop: CancellationToken,
    abort: CancellationToken,
    task: JoinHandle<()>,
}

/// Single-worker consumer of the credit subject
pub struct CreditConsumer {
    broker: Arc<dyn MessageBroker>,
    handler: Arc<ProcessCreditHandler>,
    breaker: Arc<BrokerCircuitBreaker>,
    shutdown_timeout: Duration,
    state: Arc<watch::Sender<ConsumerState>>,
    running: Mutex<Option<RunningConsumer>>,
}

impl CreditConsumer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        handler: Arc<ProcessCreditHandler>,
        breaker: Arc<BrokerCircuitBreaker>,
        shutdown_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);
        Self {
            broker,
            handler,
            breaker,
            shutdown_timeout,
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn breaker(&self) -> &Arc<BrokerCircuitBreaker> {
        &self.breaker
    }

    /// Resolves once the consumer is `Stopped`, including when its
    /// subscription ends on its own.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as self, so this only errors on drop.
        let _ = rx.wait_for(|s| *s == ConsumerState::Stopped).await;
    }

    /// Acquire a subscription and start the receive loop.
    ///
    /// Starting an already running consumer is a no-op.
    pub async fn start(&self) -> Result<(), BrokerError> {
        let mut running = self.running.lock().await;

        if self.state() != ConsumerState::Stopped {
            return Ok(());
        }
        // A previous loop that ended by itself leaves a finished handle behind.
        running.take();

        self.state.send_replace(ConsumerState::Starting);
        tracing::info!("Credit consumer starting");

        let subscription = match self.breaker.call(self.broker.subscribe()).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.state.send_replace(ConsumerState::Stopped);
                tracing::error!(error = %e, "Credit consumer failed to start");
                return Err(e);
            }
        };

        let stop = CancellationToken::new();
        let abort = CancellationToken::new();

        self.state.send_replace(ConsumerState::Running);
        let task = tokio::spawn(receive_loop(
            subscription,
            self.handler.clone(),
            stop.clone(),
            abort.clone(),
            self.state.clone(),
        ));

        *running = Some(RunningConsumer { stop, abort, task });
        tracing::info!("Credit consumer running");
        Ok(())
    }

    /// Stop receiving, let the in-flight message finish within the shutdown
    /// window, then release the subscription.
    ///
    /// If the window elapses the in-flight message is abandoned.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(RunningConsumer {
            stop,
            abort,
            mut task,
        }) = running.take()
        else {
            return;
        };

        if self.state() == ConsumerState::Running {
            self.state.send_replace(ConsumerState::Stopping);
        }
        tracing::info!("Credit consumer stopping");
        stop.cancel();

        if tokio::time::timeout(self.shutdown_timeout, &mut task)
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Shutdown window elapsed, abandoning in-flight message"
            );
            abort.cancel();
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Credit consumer task failed");
            }
        }

        self.state.send_replace(ConsumerState::Stopped);
        tracing::info!("Credit consumer stopped");
    }
}

async fn receive_loop(
    mut subscription: Box<dyn Subscription>,
    handler: Arc<ProcessCreditHandler>,
    stop: CancellationToken,
    abort: CancellationToken,
    state: Arc<watch::Sender<ConsumerState>>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = subscription.next_delivery() => next,
        };

        let mut delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Error receiving credit message");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(STREAM_ERROR_BACKOFF) => continue,
                }
            }
            None => {
                tracing::warn!("Credit subscription ended");
                break;
            }
        };

        // Abort interrupts processing only; settlement always runs to the end.
        process_delivery(&handler, delivery.as_mut(), &abort).await;

        if abort.is_cancelled() {
            break;
        }
    }

    if let Err(e) = subscription.close().await {
        tracing::warn!(error = %e, "Failed to close credit subscription");
    }
    state.send_replace(ConsumerState::Stopped);
}

/// Apply one delivery and settle it.
///
/// Cancelling `cancel` interrupts processing and abandons the message.
/// Settlement failures are logged; the broker redelivers anything left
/// unsettled.
pub async fn process_delivery(
    handler: &ProcessCreditHandler,
    delivery: &mut dyn Delivery,
    cancel: &CancellationToken,
) -> Settlement {
    let message_id = delivery.message_id().to_string();

    let payload = match decode_credit(delivery.body()) {
        Ok(payload) => payload,
        Err(e) => {
            let description = format!("Could not deserialize credit message: {}", e);
            tracing::warn!(message_id = %message_id, reason = "InvalidMessage", error = %e, "Dead-lettering message");
            return dead_letter(delivery, DeadLetterReason::InvalidMessage, &description).await;
        }
    };

    let credit_number = payload.credit_number.clone();
    let command = ProcessCreditCommand::new(payload).with_message_id(message_id.clone());

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = handler.execute(command, cancel) => Some(result),
    };

    let Some(result) = result else {
        tracing::warn!(message_id = %message_id, credit_number = %credit_number, "Processing interrupted, abandoning message");
        return abandon(delivery).await;
    };

    match result {
        Ok(outcome) => {
            match outcome {
                ProcessOutcome::Created { id } => {
                    tracing::info!(message_id = %message_id, credit_number = %credit_number, id, "Credit stored")
                }
                ProcessOutcome::AlreadyExists => {
                    tracing::info!(message_id = %message_id, credit_number = %credit_number, "Credit already stored, discarding message")
                }
            }
            if let Err(e) = delivery.complete().await {
                tracing::error!(message_id = %message_id, error = %e, "Failed to complete message");
            }
            Settlement::Completed
        }
        Err(e) if e.kind() == FaultKind::Validation => {
            tracing::warn!(
                message_id = %message_id,
                credit_number = %credit_number,
                reason = "InvalidCredit",
                error = %e,
                "Dead-lettering message"
            );
            dead_letter(delivery, DeadLetterReason::InvalidCredit, &e.to_string()).await
        }
        Err(e) if delivery.is_last_delivery() && !cancel.is_cancelled() => {
            let deliveries = delivery.delivery_count();
            tracing::error!(
                message_id = %message_id,
                credit_number = %credit_number,
                deliveries,
                reason = "MaxDeliveryCountExceeded",
                error = %e,
                "Redelivery limit reached, dead-lettering message"
            );
            let description = format!("Failed after {} deliveries: {}", deliveries, e);
            dead_letter(delivery, DeadLetterReason::MaxDeliveryCountExceeded, &description).await
        }
        Err(e) => {
            tracing::error!(
                message_id = %message_id,
                credit_number = %credit_number,
                deliveries = delivery.delivery_count(),
                error = %e,
                "Error processing credit, abandoning for redelivery"
            );
            abandon(delivery).await
        }
    }
}

async fn abandon(delivery: &mut dyn Delivery) -> Settlement {
    if let Err(e) = delivery.abandon().await {
        tracing::error!(message_id = delivery.message_id(), error = %e, "Failed to abandon message");
    }
    Settlement::Abandoned
}

async fn dead_letter(
    delivery: &mut dyn Delivery,
    reason: DeadLetterReason,
    description: &str,
) -> Settlement {
    if let Err(e) = delivery.dead_letter(reason, description).await {
        tracing::error!(message_id = delivery.message_id(), error = %e, "Failed to dead-letter message");
    }
    Settlement::DeadLettered(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credit, CreditNumber, NfseNumber};
    use crate::messaging::InMemoryBroker;
    use crate::repository::{cancellable, CreditRepository, InMemoryCreditRepository, RepositoryError};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Store whose `add` takes a fixed time, or rejects every value
    #[derive(Debug, Default)]
    struct ScriptedRepository {
        inner: InMemoryCreditRepository,
        add_delay: Duration,
        reject_values: bool,
        add_started: Notify,
    }

    #[async_trait]
    impl CreditRepository for ScriptedRepository {
        async fn add(&self, credit: &Credit, cancel: &CancellationToken) -> Result<i64, RepositoryError> {
            self.add_started.notify_one();
            if self.reject_values {
                return Err(RepositoryError::InvalidData(
                    "numeric field overflow (SQLSTATE 22003)".into(),
                ));
            }

            cancellable(cancel, async {
                tokio::time::sleep(self.add_delay).await;
                Ok(())
            })
            .await?;
            self.inner.add(credit, cancel).await
        }

        async fn find_by_credit_number(
            &self,
            credit_number: &CreditNumber,
            cancel: &CancellationToken,
        ) -> Result<Option<Credit>, RepositoryError> {
            self.inner.find_by_credit_number(credit_number, cancel).await
        }

        async fn find_by_nfse_number(
            &self,
            nfse_number: &NfseNumber,
            cancel: &CancellationToken,
        ) -> Result<Vec<Credit>, RepositoryError> {
            self.inner.find_by_nfse_number(nfse_number, cancel).await
        }

        async fn exists(
            &self,
            credit_number: &CreditNumber,
            cancel: &CancellationToken,
        ) -> Result<bool, RepositoryError> {
            self.inner.exists(credit_number, cancel).await
        }
    }

    /// Delivery whose ack takes 200ms
    #[derive(Debug, Default)]
    struct SlowAckDelivery {
        body: Vec<u8>,
        completed: u32,
        abandoned: u32,
    }

    #[async_trait]
    impl Delivery for SlowAckDelivery {
        fn message_id(&self) -> &str {
            "slow-ack"
        }

        fn body(&self) -> &[u8] {
            &self.body
        }

        fn delivery_count(&self) -> u32 {
            1
        }

        fn is_last_delivery(&self) -> bool {
            false
        }

        async fn complete(&mut self) -> Result<(), BrokerError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.completed += 1;
            Ok(())
        }

        async fn abandon(&mut self) -> Result<(), BrokerError> {
            self.abandoned += 1;
            Ok(())
        }

        async fn dead_letter(&mut self, _: DeadLetterReason, _: &str) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn consumer_with(
        broker: &InMemoryBroker,
        repository: Arc<dyn CreditRepository>,
        shutdown_timeout: Duration,
    ) -> CreditConsumer {
        CreditConsumer::new(
            Arc::new(broker.clone()),
            Arc::new(ProcessCreditHandler::new(repository)),
            Arc::new(BrokerCircuitBreaker::default()),
            shutdown_timeout,
        )
    }

    fn valid_body(number: &str) -> String {
        serde_json::json!({
            "numeroCredito": number,
            "numeroNfse": "7891011",
            "dataConstituicao": "2024-02-25",
            "valorIssqn": 1250,
            "tipoCredito": "ISSQN",
            "simplesNacional": "Sim",
            "aliquota": 5,
            "valorFaturado": 30000,
            "valorDeducao": 5000,
            "baseCalculo": 25000
        })
        .to_string()
    }

    fn setup() -> (InMemoryBroker, Arc<InMemoryCreditRepository>, CreditConsumer) {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(InMemoryCreditRepository::new());
        let handler = Arc::new(ProcessCreditHandler::new(repository.clone()));
        let consumer = CreditConsumer::new(
            Arc::new(broker.clone()),
            handler,
            Arc::new(BrokerCircuitBreaker::default()),
            Duration::from_secs(5),
        );
        (broker, repository, consumer)
    }

    async fn next(broker: &InMemoryBroker) -> Box<dyn Delivery> {
        let mut subscription = broker.subscribe().await.unwrap();
        subscription.next_delivery().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_process_valid_message() {
        let (broker, repository, _) = setup();
        let handler = ProcessCreditHandler::new(repository.clone());
        broker.deliver_raw(valid_body("123456")).await;

        let mut delivery = next(&broker).await;
        let settlement = process_delivery(&handler, delivery.as_mut(), &CancellationToken::new()).await;

        assert_eq!(settlement, Settlement::Completed);
        assert_eq!(repository.len().await, 1);
        assert_eq!(broker.completed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_dead_lettered() {
        let (broker, repository, _) = setup();
        let handler = ProcessCreditHandler::new(repository.clone());
        broker.deliver_raw("{ not json").await;

        let mut delivery = next(&broker).await;
        let settlement = process_delivery(&handler, delivery.as_mut(), &CancellationToken::new()).await;

        assert_eq!(settlement, Settlement::DeadLettered(DeadLetterReason::InvalidMessage));
        let dead = broker.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert!(dead[0].description.contains("deserialize"));
    }

    #[tokio::test]
    async fn test_invalid_credit_dead_lettered() {
        let (broker, repository, _) = setup();
        let handler = ProcessCreditHandler::new(repository.clone());
        let body = valid_body("1").replace("\"baseCalculo\":25000", "\"baseCalculo\":20000");
        broker.deliver_raw(body).await;

        let mut delivery = next(&broker).await;
        let settlement = process_delivery(&handler, delivery.as_mut(), &CancellationToken::new()).await;

        assert_eq!(settlement, Settlement::DeadLettered(DeadLetterReason::InvalidCredit));
        assert!(repository.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_failure_abandons() {
        let (broker, repository, _) = setup();
        let handler = ProcessCreditHandler::new(repository.clone());
        repository.set_unavailable(true);
        broker.deliver_raw(valid_body("1")).await;

        let mut delivery = next(&broker).await;
        let settlement = process_delivery(&handler, delivery.as_mut(), &CancellationToken::new()).await;

        assert_eq!(settlement, Settlement::Abandoned);
        assert_eq!(broker.pending().await, 1, "message returned for redelivery");
        assert!(broker.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (broker, repository, consumer) = setup();
        assert_eq!(consumer.state(), ConsumerState::Stopped);

        consumer.start().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Running);

        broker.deliver_raw(valid_body("1")).await;
        assert!(broker.wait_until_settled(1, Duration::from_secs(2)).await);

        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert!(repository
            .exists(
                &crate::domain::CreditNumber::new("1").unwrap(),
                &CancellationToken::new()
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_start_failure_stays_stopped() {
        let (broker, _, consumer) = setup();
        broker.fail_next_subscribes(1);

        assert!(consumer.start().await.is_err());
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(consumer.breaker().consecutive_failures().await, 1);
    }

    #[tokio::test]
    async fn test_subscription_end_stops_consumer() {
        let (broker, _, consumer) = setup();
        consumer.start().await.unwrap();

        broker.end_subscriptions();
        tokio::time::timeout(Duration::from_secs(2), consumer.stopped())
            .await
            .unwrap();

        // A stopped consumer can be started again.
        consumer.start().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Running);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_store_rejected_value_dead_lettered() {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(ScriptedRepository {
            reject_values: true,
            ..Default::default()
        });
        let handler = ProcessCreditHandler::new(repository.clone());
        broker.deliver_raw(valid_body("123456")).await;

        let mut delivery = next(&broker).await;
        let settlement = process_delivery(&handler, delivery.as_mut(), &CancellationToken::new()).await;

        assert_eq!(settlement, Settlement::DeadLettered(DeadLetterReason::InvalidCredit));
        assert_eq!(broker.abandoned_count(), 0);
        assert!(broker.dead_letters().await[0].description.contains("22003"));
    }

    #[tokio::test]
    async fn test_redelivery_limit_dead_letters() {
        let (broker, repository, consumer) = setup();
        broker.set_redelivery(3, Duration::ZERO);
        repository.set_unavailable(true);

        consumer.start().await.unwrap();
        broker.deliver_raw(valid_body("123456")).await;
        assert!(broker.wait_until_settled(1, Duration::from_secs(2)).await);
        consumer.stop().await;

        let dead = broker.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, DeadLetterReason::MaxDeliveryCountExceeded);
        assert!(dead[0].description.contains("3 deliveries"));
        assert_eq!(broker.abandoned_count(), 2);
        assert_eq!(broker.pending().await, 0);
        assert!(repository.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_message_finish() {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(ScriptedRepository {
            add_delay: Duration::from_millis(200),
            ..Default::default()
        });
        let consumer = consumer_with(&broker, repository.clone(), Duration::from_secs(5));

        consumer.start().await.unwrap();
        broker.deliver_raw(valid_body("123456")).await;
        repository.add_started.notified().await;

        consumer.stop().await;

        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(broker.completed().await.len(), 1);
        assert_eq!(broker.abandoned_count(), 0);
        assert_eq!(repository.inner.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_window_abandons_in_flight_message() {
        let broker = InMemoryBroker::new();
        let repository = Arc::new(ScriptedRepository {
            add_delay: Duration::from_secs(5),
            ..Default::default()
        });
        let consumer = consumer_with(&broker, repository.clone(), Duration::from_millis(100));

        consumer.start().await.unwrap();
        broker.deliver_raw(valid_body("123456")).await;
        repository.add_started.notified().await;

        consumer.stop().await;

        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(broker.abandoned_count(), 1);
        assert_eq!(broker.pending().await, 1);
        assert!(broker.completed().await.is_empty());
        assert!(repository.inner.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_ack_does_not_abandon() {
        let repository = Arc::new(InMemoryCreditRepository::new());
        let handler = ProcessCreditHandler::new(repository.clone());
        let cancel = CancellationToken::new();
        let mut delivery = SlowAckDelivery {
            body: valid_body("123456").into_bytes(),
            ..Default::default()
        };

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let settlement = process_delivery(&handler, &mut delivery, &cancel).await;
        canceller.await.unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(settlement, Settlement::Completed);
        assert_eq!(delivery.completed, 1);
        assert_eq!(delivery.abandoned, 0);
        assert_eq!(repository.len().await, 1);
    }
}
