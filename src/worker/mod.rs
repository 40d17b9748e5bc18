//! Background credit processor
//!
//! Supervises the [`CreditConsumer`]: waits out the start delay, starts the
//! consumer, retries on failure and restarts it when its subscription ends.
//! Configuration faults end the service; everything else is retried.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ConsumerSettings;
use crate::domain::FaultKind;
use crate::messaging::CreditConsumer;

/// Supervisor for the credit consumer
pub struct CreditProcessorService {
    consumer: Arc<CreditConsumer>,
    settings: ConsumerSettings,
}

impl CreditProcessorService {
    pub fn new(consumer: Arc<CreditConsumer>, settings: ConsumerSettings) -> Self {
        Self { consumer, settings }
    }

    /// Start the service in the background
    /// Cancel `shutdown` and await the handle to stop it
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Run the supervision loop until `shutdown` is cancelled or a fatal fault
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            start_delay_ms = self.settings.start_delay.as_millis() as u64,
            "Credit processor service started"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Credit processor service stopped before first start");
                return;
            }
            _ = tokio::time::sleep(self.settings.start_delay) => {}
        }

        loop {
            match self.consumer.start().await {
                Ok(()) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.consumer.stopped() => {
                            tracing::warn!("Credit consumer stopped unexpectedly, restarting");
                        }
                    }
                }
                Err(e) if e.kind() == FaultKind::Fatal => {
                    tracing::error!(error = %e, "Credit processor cannot start, giving up");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_ms = self.settings.restart_interval.as_millis() as u64,
                        "Credit consumer start failed, will retry"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.restart_interval) => {}
            }
        }

        self.consumer.stop().await;
        tracing::info!("Credit processor service stopped");
    }
}
