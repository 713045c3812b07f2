/*
[INPUT]:  Async operations returning crate Result
[OUTPUT]: Closed/Open/HalfOpen gating with failure counting and timed recovery
[POS]:    Resilience layer - circuit breaker
[UPDATE]: When changing trip or recovery rules
*/

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{PocketOptionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// One probing call is allowed through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Time spent open before a probe is allowed.
    pub recovery_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

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
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().await;
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
        }
    }

    /// Run `operation` through the breaker. While open and inside the recovery
    /// window the operation is not invoked and `CircuitOpen` is returned.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit().await?;

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(err)
            }
        }
    }

    async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let recovered = inner
            .last_failure
            .map(|at| at.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true);
        if !recovered {
            return Err(PocketOptionError::CircuitOpen {
                name: self.name.clone(),
            });
        }

        inner.state = CircuitState::HalfOpen;
        info!(breaker = %self.name, "circuit half-open; probing");
        Ok(())
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                recovery_secs = self.config.recovery_timeout.as_secs_f64(),
                "circuit opened"
            );
        }
    }
}
