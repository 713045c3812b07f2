/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public Pocket Option adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod resilience;
pub mod tracking;
pub mod types;
pub mod ws;

pub use auth::SessionCredentials;

pub use client::PocketOptionClient;

pub use config::{ClientConfig, KeepAliveConfig, MonitoringConfig, SessionConfig, TradingConfig};

pub use error::{PocketOptionError, Result};

// Re-export commonly used types from resilience
pub use resilience::{
    Alert,
    CircuitBreaker,
    CircuitState,
    ErrorCategory,
    ErrorMonitor,
    ErrorSeverity,
    ErrorSummary,
    HealthChecker,
    HealthReport,
    OverallHealth,
    ResilienceContext,
    RetryPolicy,
};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    CallbackResult,
    ClientEvent,
    Endpoint,
    EventCallback,
    EventKind,
    SubscriptionId,
};
