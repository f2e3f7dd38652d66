//! Circuit breaker guarding a single downstream operation.
//!
//! ```text
//!   CLOSED ──(failures >= threshold)──► OPEN ──(reset_timeout elapsed)──► HALF_OPEN
//!     ▲                                  ▲                                   │
//!     │                                  └───────────── failure ─────────────┤
//!     └────────────────────────────────── success ───────────────────────────┘
//! ```
//!
//! Entering HALF_OPEN does not reset the failure count, so a single failed
//! probe immediately re-opens the circuit. The first success closes it.
//!
//! Timeouts are a race between the operation and a timer. The operation runs
//! on its own task and is NOT cancelled when the timer wins: its eventual
//! result is discarded. Use [`CircuitBreaker::execute_with_cancel`] to hand
//! the operation a token that fires on timeout.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{self, Error};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (since the last success) that open the circuit.
    pub failure_threshold: u32,

    /// Per-call timeout; a timeout counts as a failure.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub timeout: Duration,

    /// Time after the last failure before a probe is allowed.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub request_count: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    request_count: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            request_count: 0,
            last_failure: None,
            last_failure_at: None,
        }
    }
}

/// Circuit breaker for one protected operation.
///
/// Owned by the caller that constructed it; never share one breaker between
/// unrelated operations.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            success_count: inner.success_count,
            request_count: inner.request_count,
        }
    }

    /// Force the breaker back to CLOSED with all counters cleared.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        tracing::info!("circuit_reset: name={}", self.name);
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejects with [`Error::CircuitOpen`] without invoking the operation while
    /// the circuit is open and the reset timeout has not elapsed.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> types::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = types::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.admit()?;
        let outcome = self.race(tokio::spawn(operation()), None).await;
        self.settle(outcome)
    }

    /// Like [`execute`](Self::execute), but the operation receives a token that
    /// is cancelled when the timeout wins the race.
    pub async fn execute_with_cancel<F, Fut, T>(&self, operation: F) -> types::Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = types::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.admit()?;
        let token = CancellationToken::new();
        let handle = tokio::spawn(operation(token.clone()));
        let outcome = self.race(handle, Some(token)).await;
        self.settle(outcome)
    }

    fn admit(&self) -> types::Result<()> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner.last_failure.map(|at| at.elapsed());
            match elapsed {
                Some(elapsed) if elapsed < self.config.reset_timeout => {
                    tracing::debug!(
                        "circuit_rejected: name={} retry_in_ms={}",
                        self.name,
                        (self.config.reset_timeout - elapsed).as_millis()
                    );
                    return Err(Error::circuit_open(format!(
                        "{} is open after {} failures",
                        self.name, inner.failure_count
                    )));
                }
                _ => {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("circuit_half_open: name={}", self.name);
                }
            }
        }

        inner.request_count += 1;
        Ok(())
    }

    async fn race<T>(
        &self,
        handle: JoinHandle<types::Result<T>>,
        cancel: Option<CancellationToken>,
    ) -> types::Result<T> {
        // Dropping the handle on timeout detaches the task; it keeps running.
        match tokio::time::timeout(self.config.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::internal(format!(
                "operation {} aborted: {}",
                self.name, join_err
            ))),
            Err(_) => {
                if let Some(token) = cancel {
                    token.cancel();
                }
                Err(Error::timeout(format!(
                    "{} did not complete within {}ms",
                    self.name,
                    self.config.timeout.as_millis()
                )))
            }
        }
    }

    fn settle<T>(&self, outcome: types::Result<T>) -> types::Result<T> {
        let mut inner = self.inner.lock();

        match &outcome {
            Ok(_) => {
                inner.success_count += 1;
                inner.failure_count = 0;
                if inner.state != CircuitState::Closed {
                    tracing::info!(
                        "circuit_closed: name={} previous={:?}",
                        self.name,
                        inner.state
                    );
                    inner.state = CircuitState::Closed;
                }
            }
            Err(err) => {
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                inner.last_failure_at = Some(Utc::now());

                if inner.failure_count >= self.config.failure_threshold
                    && inner.state != CircuitState::Open
                {
                    tracing::warn!(
                        "circuit_opened: name={} failures={} last_error={}",
                        self.name,
                        inner.failure_count,
                        err
                    );
                    inner.state = CircuitState::Open;
                }
            }
        }

        outcome
    }
}
