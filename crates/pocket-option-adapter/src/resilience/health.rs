/*
[INPUT]:  Named async probes registered by the client
[OUTPUT]: Per-probe reports and an aggregated health verdict, refreshed on an interval
[POS]:    Resilience layer - health checker
[UPDATE]: When adding probe kinds or changing the aggregation rule
*/

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Resolves to `Ok(true)` when the checked component is healthy.
pub type HealthProbe = Arc<dyn Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Unhealthy,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub status: ProbeStatus,
    pub last_check: DateTime<Utc>,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallHealth {
    /// No failing probe is healthy, one is degraded, more is unhealthy.
    pub fn from_failing(failing: usize) -> Self {
        match failing {
            0 => OverallHealth::Healthy,
            1 => OverallHealth::Degraded,
            _ => OverallHealth::Unhealthy,
        }
    }
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallHealth::Healthy => write!(f, "healthy"),
            OverallHealth::Degraded => write!(f, "degraded"),
            OverallHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall: OverallHealth,
    pub checked_at: DateTime<Utc>,
    pub services: HashMap<String, ProbeReport>,
}

pub struct HealthChecker {
    interval: Duration,
    probes: RwLock<HashMap<String, HealthProbe>>,
    results: RwLock<HashMap<String, ProbeReport>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl HealthChecker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            probes: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            task: Mutex::new(None),
        }
    }

    /// Registering under an existing name replaces that probe.
    pub async fn register(&self, name: impl Into<String>, probe: HealthProbe) {
        self.probes.write().await.insert(name.into(), probe);
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.results.write().await.remove(name);
        self.probes.write().await.remove(name).is_some()
    }

    /// Run every probe once, each bounded by the check interval.
    pub async fn run_checks(&self) -> HealthReport {
        let probes: Vec<(String, HealthProbe)> = self
            .probes
            .read()
            .await
            .iter()
            .map(|(name, probe)| (name.clone(), probe.clone()))
            .collect();

        for (name, probe) in probes {
            let started = Instant::now();
            let (status, error) = match tokio::time::timeout(self.interval, probe()).await {
                Ok(Ok(true)) => (ProbeStatus::Healthy, None),
                Ok(Ok(false)) => (ProbeStatus::Unhealthy, None),
                Ok(Err(err)) => (ProbeStatus::Error, Some(err.to_string())),
                Err(_) => (
                    ProbeStatus::Error,
                    Some(format!("probe timed out after {}ms", self.interval.as_millis())),
                ),
            };
            if status != ProbeStatus::Healthy {
                warn!(probe = %name, ?status, error = ?error, "health probe failing");
            }
            let report = ProbeReport {
                status,
                last_check: Utc::now(),
                response_time_ms: started.elapsed().as_millis() as u64,
                error,
            };
            self.results.write().await.insert(name, report);
        }

        self.report().await
    }

    /// Latest stored results; does not run probes.
    pub async fn report(&self) -> HealthReport {
        let services = self.results.read().await.clone();
        let failing = services
            .values()
            .filter(|report| report.status != ProbeStatus::Healthy)
            .count();
        HealthReport {
            overall: OverallHealth::from_failing(failing),
            checked_at: Utc::now(),
            services,
        }
    }

    /// Spawn the periodic check loop. Calling again while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let checker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!(interval_secs = checker.interval.as_secs_f64(), "health monitoring started");
            loop {
                let report = checker.run_checks().await;
                debug!(overall = %report.overall, services = report.services.len(), "health check complete");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(checker.interval) => {}
                }
            }
            debug!("health monitoring stopped");
        });
        *task = Some((cancel, handle));
    }

    pub async fn stop(&self) {
        let Some((cancel, handle)) = self.task.lock().await.take() else {
            return;
        };
        cancel.cancel();
        let abort = handle.abort_handle();
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PocketOptionError;
    use futures_util::FutureExt;
    use rstest::rstest;

    fn probe(outcome: Option<bool>) -> HealthProbe {
        Arc::new(move || {
            async move {
                match outcome {
                    Some(healthy) => Ok(healthy),
                    None => Err(PocketOptionError::NotConnected),
                }
            }
            .boxed()
        })
    }

    #[rstest]
    #[case(0, OverallHealth::Healthy)]
    #[case(1, OverallHealth::Degraded)]
    #[case(2, OverallHealth::Unhealthy)]
    #[case(5, OverallHealth::Unhealthy)]
    fn test_aggregation_rule(#[case] failing: usize, #[case] expected: OverallHealth) {
        assert_eq!(OverallHealth::from_failing(failing), expected);
    }

    #[tokio::test]
    async fn test_run_checks_records_each_probe() {
        let checker = HealthChecker::new(Duration::from_secs(1));
        checker.register("websocket", probe(Some(true))).await;
        checker.register("balance", probe(Some(false))).await;

        let report = checker.run_checks().await;
        assert_eq!(report.overall, OverallHealth::Degraded);
        assert_eq!(report.services["websocket"].status, ProbeStatus::Healthy);
        assert_eq!(report.services["balance"].status, ProbeStatus::Unhealthy);

        checker.register("feed", probe(None)).await;
        let report = checker.run_checks().await;
        assert_eq!(report.overall, OverallHealth::Unhealthy);
        assert_eq!(report.services["feed"].status, ProbeStatus::Error);
        assert!(report.services["feed"].error.is_some());
    }

    #[tokio::test]
    async fn test_slow_probe_times_out_as_error() {
        let checker = HealthChecker::new(Duration::from_millis(20));
        checker
            .register(
                "slow",
                Arc::new(|| {
                    async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok::<bool, PocketOptionError>(true)
                    }
                    .boxed()
                }),
            )
            .await;
        let report = checker.run_checks().await;
        assert_eq!(report.services["slow"].status, ProbeStatus::Error);
    }

    #[tokio::test]
    async fn test_start_stop_and_unregister() {
        let checker = Arc::new(HealthChecker::new(Duration::from_millis(10)));
        checker.register("websocket", probe(Some(true))).await;
        checker.start().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(checker.report().await.overall, OverallHealth::Healthy);
        checker.stop().await;

        assert!(checker.unregister("websocket").await);
        assert!(!checker.unregister("websocket").await);
        assert!(checker.report().await.services.is_empty());
    }
}
