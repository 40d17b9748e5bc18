//! Circuit Breaker for the broker connection
//!
//! Guards subscription start/restart only, never per-message processing.
//! - Closed: attempts go through; consecutive transport failures are counted
//! - Open: attempts are rejected without touching the broker
//! - HalfOpen: after the cool-down a single probe is let through

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::BrokerError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - attempts flow through
    Closed,
    /// Rejecting attempts until the cool-down elapses
    Open,
    /// Cool-down elapsed, next attempt probes the broker
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker around broker connection attempts
#[derive(Debug)]
pub struct BrokerCircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    inner: Mutex<BreakerState>,
}

impl BrokerCircuitBreaker {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
    pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(30);

    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_duration,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state, reporting `HalfOpen` once an open circuit has cooled down.
    pub async fn state(&self) -> CircuitState {
        let inner = self.inner.lock().await;
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) if opened.elapsed() >= self.open_duration => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.lock().await.consecutive_failures
    }

    /// Ask permission for one attempt.
    pub async fn try_acquire(&self) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!("Broker circuit breaker half-open, probing connection");
                    Ok(())
                } else {
                    Err(BrokerError::CircuitOpen {
                        retry_after: self.open_duration - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(BrokerError::CircuitOpen {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        let previous = inner.state;

        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;

        if previous != CircuitState::Closed {
            tracing::info!("Broker circuit breaker closed after successful probe");
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!("Broker circuit breaker re-opened after failed probe");
            }
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(
                    failures = inner.consecutive_failures,
                    open_secs = self.open_duration.as_secs(),
                    "Broker circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Release a probe slot without counting the attempt either way.
    async fn release(&self) {
        self.inner.lock().await.probe_in_flight = false;
    }

    /// Run `attempt` under the breaker.
    ///
    /// Only transport failures are counted; configuration errors pass through
    /// without tripping the circuit.
    pub async fn call<T, F>(&self, attempt: F) -> Result<T, BrokerError>
    where
        F: Future<Output = Result<T, BrokerError>>,
    {
        self.try_acquire().await?;

        match attempt.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) if e.is_transient() => {
                self.record_failure().await;
                Err(e)
            }
            Err(e) => {
                self.release().await;
                Err(e)
            }
        }
    }
}

impl Default for BrokerCircuitBreaker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FAILURE_THRESHOLD, Self::DEFAULT_OPEN_DURATION)
    }
}
