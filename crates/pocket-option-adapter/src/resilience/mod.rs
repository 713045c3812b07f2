/*
[INPUT]:  Monitoring config; operations run by the client and keep-alive manager
[OUTPUT]: ResilienceContext owning breakers, retry policies, error monitor and health checker
[POS]:    Resilience layer - module root
[UPDATE]: When adding operation categories or changing the monitored-call composition
*/

mod circuit_breaker;
mod health;
mod monitor;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use health::{HealthChecker, HealthProbe, HealthReport, OverallHealth, ProbeReport, ProbeStatus};
pub use monitor::{
    Alert, AlertCallback, ErrorCategory, ErrorEvent, ErrorMonitor, ErrorSeverity, ErrorSummary,
};
pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::MonitoringConfig;
use crate::error::{PocketOptionError, Result};

/// Which breaker/retry pair guards an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    Connection,
    Trading,
    Data,
}

impl OperationCategory {
    fn error_category(self) -> ErrorCategory {
        match self {
            OperationCategory::Connection => ErrorCategory::Connection,
            OperationCategory::Trading => ErrorCategory::Trading,
            OperationCategory::Data => ErrorCategory::Data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub use_breaker: bool,
    pub use_retry: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            use_breaker: true,
            use_retry: true,
        }
    }
}

impl MonitorOptions {
    pub fn breaker_only() -> Self {
        Self {
            use_breaker: true,
            use_retry: false,
        }
    }
}

/// Resilience state owned by one client instance.
#[derive(Debug)]
pub struct ResilienceContext {
    pub errors: ErrorMonitor,
    pub health: Arc<HealthChecker>,
    connection_breaker: CircuitBreaker,
    trading_breaker: CircuitBreaker,
    data_breaker: CircuitBreaker,
    connection_retry: RetryPolicy,
    trading_retry: RetryPolicy,
    data_retry: RetryPolicy,
}

impl ResilienceContext {
    pub fn new(config: &MonitoringConfig) -> Self {
        Self {
            errors: ErrorMonitor::new(config),
            health: Arc::new(HealthChecker::new(config.health_check_interval)),
            connection_breaker: CircuitBreaker::new(
                "connection",
                CircuitBreakerConfig::new(3, Duration::from_secs(30)),
            ),
            trading_breaker: CircuitBreaker::new(
                "trading",
                CircuitBreakerConfig::new(5, Duration::from_secs(60)),
            ),
            data_breaker: CircuitBreaker::new(
                "data",
                CircuitBreakerConfig::new(10, Duration::from_secs(30)),
            ),
            connection_retry: RetryPolicy::new(3, Duration::from_secs(2)),
            trading_retry: RetryPolicy::new(2, Duration::from_secs(1)),
            data_retry: RetryPolicy::new(5, Duration::from_millis(500)),
        }
    }

    pub fn breaker(&self, category: OperationCategory) -> &CircuitBreaker {
        match category {
            OperationCategory::Connection => &self.connection_breaker,
            OperationCategory::Trading => &self.trading_breaker,
            OperationCategory::Data => &self.data_breaker,
        }
    }

    pub fn retry_policy(&self, category: OperationCategory) -> &RetryPolicy {
        match category {
            OperationCategory::Connection => &self.connection_retry,
            OperationCategory::Trading => &self.trading_retry,
            OperationCategory::Data => &self.data_retry,
        }
    }

    pub async fn breaker_snapshots(&self) -> Vec<CircuitSnapshot> {
        vec![
            self.connection_breaker.snapshot().await,
            self.trading_breaker.snapshot().await,
            self.data_breaker.snapshot().await,
        ]
    }

    /// Feed `err` to the error monitor as `"{operation}_error"`.
    pub async fn record(&self, err: &PocketOptionError, operation: &str) {
        self.record_in(err, operation, err.category()).await;
    }

    async fn record_in(&self, err: &PocketOptionError, operation: &str, category: ErrorCategory) {
        let severity = match category {
            ErrorCategory::Connection | ErrorCategory::Authentication => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        };
        let context = HashMap::from([("operation".to_string(), operation.to_string())]);
        self.errors
            .record_error(
                &format!("{operation}_error"),
                severity,
                category,
                &err.to_string(),
                context,
            )
            .await;
    }

    /// Run `operation` under the category's breaker and/or retry policy. The
    /// breaker wraps the whole retry sequence. A final failure is recorded.
    pub async fn execute_with_monitoring<T, F, Fut>(
        &self,
        operation_name: &str,
        category: OperationCategory,
        options: MonitorOptions,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breaker(category);
        let retry = self.retry_policy(category);

        let result = match (options.use_breaker, options.use_retry) {
            (true, true) => {
                let operation = &mut operation;
                breaker.call(move || retry.execute(operation)).await
            }
            (true, false) => breaker.call(operation).await,
            (false, true) => retry.execute(operation).await,
            (false, false) => operation().await,
        };

        if let Err(err) = &result {
            let error_category = match err {
                PocketOptionError::Authentication { .. } => ErrorCategory::Authentication,
                _ => category.error_category(),
            };
            self.record_in(err, operation_name, error_category).await;
        }
        result
    }
}
