/*
[INPUT]:  Error reports from the facade, keep-alive manager and monitored operations
[OUTPUT]: Bounded error history, per-type alerting, summary queries
[POS]:    Resilience layer - error monitor
[UPDATE]: When changing alert rules or summary fields
*/

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{error, warn};

use crate::config::MonitoringConfig;

const TOP_ERRORS_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    Authentication,
    Trading,
    Data,
    System,
    RateLimit,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Trading => "trading",
            ErrorCategory::Data => "data",
            ErrorCategory::System => "system",
            ErrorCategory::RateLimit => "rate_limit",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
    pub message: String,
    pub context: HashMap<String, String>,
}

/// Raised once per error type each time its windowed count reaches the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub error_type: String,
    pub count: usize,
    pub window_secs: u64,
    pub latest: ErrorEvent,
}

pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub error_rate_per_hour: f64,
    pub by_type: HashMap<String, usize>,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub by_severity: HashMap<ErrorSeverity, usize>,
    pub top_errors: Vec<(String, usize)>,
}

#[derive(Debug, Default)]
struct MonitorState {
    events: VecDeque<ErrorEvent>,
    windows: HashMap<String, VecDeque<Instant>>,
    alerting: HashSet<String>,
    total_recorded: u64,
}

pub struct ErrorMonitor {
    max_errors: usize,
    alert_threshold: usize,
    alert_window: Duration,
    state: Mutex<MonitorState>,
    callbacks: RwLock<Vec<AlertCallback>>,
}

impl fmt::Debug for ErrorMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorMonitor")
            .field("max_errors", &self.max_errors)
            .field("alert_threshold", &self.alert_threshold)
            .field("alert_window", &self.alert_window)
            .finish_non_exhaustive()
    }
}

impl ErrorMonitor {
    pub fn new(config: &MonitoringConfig) -> Self {
        Self {
            max_errors: config.max_errors.max(1),
            alert_threshold: config.alert_threshold.max(1),
            alert_window: config.alert_window,
            state: Mutex::new(MonitorState::default()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub async fn add_alert_callback(&self, callback: AlertCallback) {
        self.callbacks.write().await.push(callback);
    }

    pub async fn record_error(
        &self,
        error_type: &str,
        severity: ErrorSeverity,
        category: ErrorCategory,
        message: &str,
        context: HashMap<String, String>,
    ) {
        let event = ErrorEvent {
            timestamp: Utc::now(),
            error_type: error_type.to_string(),
            severity,
            category,
            message: message.to_string(),
            context,
        };

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(error_type, %category, %severity, detail = message, "error recorded");
            }
            ErrorSeverity::Medium | ErrorSeverity::Low => {
                warn!(error_type, %category, %severity, detail = message, "error recorded");
            }
        }

        let alert = {
            let mut state = self.state.lock().await;
            state.total_recorded += 1;
            state.events.push_back(event.clone());
            while state.events.len() > self.max_errors {
                state.events.pop_front();
            }

            let now = Instant::now();
            let window = self.alert_window;
            let count = {
                let stamps = state.windows.entry(event.error_type.clone()).or_default();
                stamps.push_back(now);
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) > window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                stamps.len()
            };

            if count < self.alert_threshold {
                state.alerting.remove(&event.error_type);
                None
            } else if state.alerting.insert(event.error_type.clone()) {
                Some(Alert {
                    error_type: event.error_type.clone(),
                    count,
                    window_secs: window.as_secs(),
                    latest: event,
                })
            } else {
                None
            }
        };

        if let Some(alert) = alert {
            self.fire_alert(&alert).await;
        }
    }

    async fn fire_alert(&self, alert: &Alert) {
        error!(
            error_type = %alert.error_type,
            count = alert.count,
            window_secs = alert.window_secs,
            "error alert threshold reached"
        );
        let callbacks = self.callbacks.read().await.clone();
        for callback in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                warn!(error_type = %alert.error_type, "alert callback panicked");
            }
        }
    }

    /// Totals over the events recorded within `lookback`.
    pub async fn summary(&self, lookback: Duration) -> ErrorSummary {
        let cutoff = chrono::Duration::from_std(lookback)
            .ok()
            .and_then(|lookback| Utc::now().checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let state = self.state.lock().await;
        let recent: Vec<&ErrorEvent> = state
            .events
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .collect();

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_category: HashMap<ErrorCategory, usize> = HashMap::new();
        let mut by_severity: HashMap<ErrorSeverity, usize> = HashMap::new();
        for event in &recent {
            *by_type.entry(event.error_type.clone()).or_default() += 1;
            *by_category.entry(event.category).or_default() += 1;
            *by_severity.entry(event.severity).or_default() += 1;
        }

        let mut top_errors: Vec<(String, usize)> =
            by_type.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_errors.truncate(TOP_ERRORS_LIMIT);

        let hours = lookback.as_secs_f64() / 3600.0;
        let error_rate_per_hour = if hours > 0.0 {
            recent.len() as f64 / hours
        } else {
            0.0
        };

        ErrorSummary {
            total_errors: recent.len(),
            error_rate_per_hour,
            by_type,
            by_category,
            by_severity,
            top_errors,
        }
    }

    /// Most recent events, newest last.
    pub async fn recent_errors(&self, limit: usize) -> Vec<ErrorEvent> {
        let state = self.state.lock().await;
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    pub async fn total_recorded(&self) -> u64 {
        self.state.lock().await.total_recorded
    }
}
