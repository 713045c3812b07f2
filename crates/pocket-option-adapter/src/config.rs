/*
[INPUT]:  Defaults, config files (any serde format), environment overrides
[OUTPUT]: ClientConfig and its per-layer sections
[POS]:    Configuration layer - timeouts, intervals, limits
[UPDATE]: When adding tunables to the session, keep-alive, trading or monitoring layers
*/

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::ConnectionMode;

pub const DEFAULT_ORIGIN: &str = "https://pocketoption.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub is_demo: bool,
    pub uid: u64,
    pub platform: u32,
    pub is_fast_history: bool,
    pub mode: ConnectionMode,
    pub auto_reconnect: bool,
    pub session: SessionConfig,
    pub keep_alive: KeepAliveConfig,
    pub trading: TradingConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            is_demo: true,
            uid: 0,
            platform: 1,
            is_fast_history: true,
            mode: ConnectionMode::Simple,
            auto_reconnect: true,
            session: SessionConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            trading: TradingConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Apply `PING_INTERVAL`, `MAX_RECONNECT_ATTEMPTS`, `MIN_ORDER_AMOUNT`,
    /// `MAX_ORDER_AMOUNT` and `DEFAULT_TIMEOUT` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secs) = parse_env::<f64>(&lookup, "PING_INTERVAL") {
            self.keep_alive.ping_interval = Duration::from_secs_f64(secs.max(0.0));
        }
        if let Some(attempts) = parse_env::<u32>(&lookup, "MAX_RECONNECT_ATTEMPTS") {
            self.keep_alive.max_reconnect_attempts = attempts;
        }
        if let Some(amount) = parse_env::<Decimal>(&lookup, "MIN_ORDER_AMOUNT") {
            self.trading.min_order_amount = amount;
        }
        if let Some(amount) = parse_env::<Decimal>(&lookup, "MAX_ORDER_AMOUNT") {
            self.trading.max_order_amount = amount;
        }
        if let Some(secs) = parse_env::<f64>(&lookup, "DEFAULT_TIMEOUT") {
            self.trading.order_timeout = Duration::from_secs_f64(secs.max(0.0));
        }
        self
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

/// Transport session tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Bound on each of the handshake waits.
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,
    /// Per-read bound in the receive loop; elapsing only loops.
    #[serde(with = "duration_secs")]
    pub receive_timeout: Duration,
    /// How long to wait for `successauth` after sending the auth frame.
    #[serde(with = "duration_secs")]
    pub auth_timeout: Duration,
    /// Require the handshake ack to echo the open frame's sid. Off by default:
    /// the ack must still carry a sid, but the live backend does not always
    /// echo the one it opened with.
    pub strict_sid_echo: bool,
    pub origin: String,
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            strict_sid_echo: false,
            origin: DEFAULT_ORIGIN.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Keep-alive manager tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    #[serde(with = "duration_secs")]
    pub ping_interval: Duration,
    #[serde(with = "duration_secs")]
    pub health_check_interval: Duration,
    /// A session whose last ping is older than this is considered dead.
    #[serde(with = "duration_secs")]
    pub ping_stale_after: Duration,
    /// Reconnect poll interval in persistent mode.
    #[serde(with = "duration_secs")]
    pub reconnect_interval: Duration,
    /// Reconnect poll interval in simple mode.
    #[serde(with = "duration_secs")]
    pub simple_reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            health_check_interval: Duration::from_secs(30),
            ping_stale_after: Duration::from_secs(60),
            reconnect_interval: Duration::from_secs(5),
            simple_reconnect_interval: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

/// Request validation bounds and correlation waits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub min_order_amount: Decimal,
    pub max_order_amount: Decimal,
    pub min_duration: u32,
    pub max_duration: u32,
    #[serde(with = "duration_secs")]
    pub order_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub order_poll_interval: Duration,
    #[serde(with = "duration_secs")]
    pub candle_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub balance_max_age: Duration,
    #[serde(with = "duration_secs")]
    pub balance_wait: Duration,
    /// Reconnect attempts a data call makes before failing with not-connected.
    pub data_reconnect_attempts: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_order_amount: Decimal::ONE,
            max_order_amount: Decimal::from(50_000),
            min_duration: 5,
            max_duration: 43_200,
            order_timeout: Duration::from_secs(30),
            order_poll_interval: Duration::from_millis(200),
            candle_timeout: Duration::from_secs(10),
            balance_max_age: Duration::from_secs(60),
            balance_wait: Duration::from_secs(1),
            data_reconnect_attempts: 1,
        }
    }
}

/// Error monitor and health checker tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub max_errors: usize,
    pub alert_threshold: usize,
    #[serde(with = "duration_secs")]
    pub alert_window: Duration,
    #[serde(with = "duration_secs")]
    pub health_check_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_errors: 1000,
            alert_threshold: 10,
            alert_window: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Durations are written as (fractional) seconds in config files.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_protocol_timings() {
        let config = ClientConfig::default();
        assert_eq!(config.keep_alive.ping_interval, Duration::from_secs(20));
        assert_eq!(config.keep_alive.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.session.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.session.receive_timeout, Duration::from_secs(30));
        assert_eq!(config.trading.order_poll_interval, Duration::from_millis(200));
        assert_eq!(config.trading.max_order_amount, Decimal::from(50_000));
        assert_eq!(config.monitoring.alert_threshold, 10);
        assert!(!config.session.strict_sid_echo);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{"is_demo": false, "keep_alive": {"ping_interval": 2.5}, "trading": {"min_order_amount": "5"}}"#;
        let config: ClientConfig = serde_json::from_str(raw).unwrap();
        assert!(!config.is_demo);
        assert_eq!(config.keep_alive.ping_interval, Duration::from_millis(2500));
        assert_eq!(config.keep_alive.max_reconnect_attempts, 10);
        assert_eq!(config.trading.min_order_amount, Decimal::from(5));
        assert_eq!(config.trading.max_duration, 43_200);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let raw = r#"{"session": {"connect_timeout": -1}}"#;
        assert!(serde_json::from_str::<ClientConfig>(raw).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PING_INTERVAL", "15"),
            ("MAX_RECONNECT_ATTEMPTS", "3"),
            ("MIN_ORDER_AMOUNT", "2.5"),
            ("DEFAULT_TIMEOUT", "not-a-number"),
        ]);
        let config = ClientConfig::default()
            .with_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.keep_alive.ping_interval, Duration::from_secs(15));
        assert_eq!(config.keep_alive.max_reconnect_attempts, 3);
        assert_eq!(config.trading.min_order_amount.to_string(), "2.5");
        assert_eq!(config.trading.order_timeout, Duration::from_secs(30));
    }
}
