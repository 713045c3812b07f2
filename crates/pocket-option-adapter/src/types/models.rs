/*
[INPUT]:  Decoded push payloads and client-side request parameters
[OUTPUT]: Typed Rust structs with serialization support
[POS]:    Data layer - balances, candles, orders and connection snapshots
[UPDATE]: When push payload shapes change or new snapshot fields are added
*/

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{ConnectionStatus, OrderDirection, OrderStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: Decimal,
    pub currency: String,
    pub is_demo: bool,
    pub last_updated: DateTime<Utc>,
}

/// One OHLC bar. `high >= low` always holds for parsed candles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub asset: String,
    pub period: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub asset: String,
    pub amount: Decimal,
    pub direction: OrderDirection,
    /// Expiry in seconds.
    pub duration: u32,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub asset: String,
    pub amount: Decimal,
    pub direction: OrderDirection,
    pub duration: u32,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub profit: Option<Decimal>,
    pub payout: Option<Decimal>,
    /// Set when the result was synthesized locally because the server never confirmed it.
    pub provisional: bool,
    pub error_message: Option<String>,
}

impl OrderResult {
    pub fn is_provisional(&self) -> bool {
        self.provisional
    }
}

/// Payout row from the asset listing frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPayout {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub kind: String,
    pub payout: Decimal,
}

/// Immutable snapshot of the live connection; replaced on every reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub url: String,
    pub region: String,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

impl ConnectionInfo {
    pub(crate) fn with_status(&self, status: ConnectionStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub(crate) fn with_last_ping(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_ping: Some(at),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total_connections: u64,
    pub successful_connections: u64,
    pub total_reconnects: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub connection_start_time: Option<DateTime<Utc>>,
    pub last_ping_time: Option<DateTime<Utc>>,
    pub is_connected: bool,
    pub current_url: Option<String>,
    pub current_region: Option<String>,
    pub reconnect_attempts: u32,
    pub uptime_secs: Option<i64>,
    pub available_endpoints: usize,
}

pub(crate) mod value_helpers {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::str::FromStr;

    pub fn decimal(value: &Value) -> Option<Decimal> {
        match value {
            Value::Number(number) => {
                let raw = number.to_string();
                Decimal::from_str(&raw)
                    .or_else(|_| Decimal::from_scientific(&raw))
                    .ok()
            }
            Value::String(raw) => {
                let raw = raw.trim();
                if raw.is_empty() {
                    return None;
                }
                Decimal::from_str(raw).ok()
            }
            _ => None,
        }
    }

    pub fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
        value.get(key).and_then(decimal)
    }

    /// Seconds since epoch, integer or fractional.
    pub fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
        if let Some(secs) = value.as_i64() {
            return DateTime::from_timestamp(secs, 0);
        }
        let secs = value.as_f64()?;
        let whole = secs.trunc() as i64;
        let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
        DateTime::from_timestamp(whole, nanos.min(999_999_999))
    }

    pub fn string_field(value: &Value, key: &str) -> Option<String> {
        match value.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Accepts `1`/`0`, `true`/`false`.
    pub fn flag_field(value: &Value, key: &str) -> Option<bool> {
        match value.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::value_helpers::*;
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_decimal_from_number_and_string() {
        assert_eq!(decimal(&json!(1234.5)), Some(Decimal::from_str("1234.5").unwrap()));
        assert_eq!(decimal(&json!("10")), Some(Decimal::from(10)));
        assert_eq!(decimal(&json!(1e-5)), Some(Decimal::from_str("0.00001").unwrap()));
        assert_eq!(decimal(&json!("")), None);
        assert_eq!(decimal(&json!(null)), None);
    }

    #[test]
    fn test_timestamp_fractional_seconds() {
        let ts = timestamp(&json!(1700000000.5)).unwrap();
        assert_eq!(ts.timestamp(), 1700000000);
        assert_eq!(ts.timestamp_subsec_millis(), 500);
        assert_eq!(timestamp(&json!(1700000000)).unwrap().timestamp(), 1700000000);
    }

    #[test]
    fn test_flag_field_accepts_ints_and_bools() {
        let value = json!({"isDemo": 1, "live": false});
        assert_eq!(flag_field(&value, "isDemo"), Some(true));
        assert_eq!(flag_field(&value, "live"), Some(false));
        assert_eq!(flag_field(&value, "missing"), None);
    }

    #[test]
    fn test_connection_info_replacement() {
        let info = ConnectionInfo {
            url: "wss://demo-api-eu.po.market".to_string(),
            region: "DEMO".to_string(),
            status: ConnectionStatus::Connected,
            connected_at: Some(Utc::now()),
            last_ping: None,
            reconnect_attempts: 0,
        };
        let pinged = info.with_last_ping(Utc::now());
        assert!(info.last_ping.is_none());
        assert!(pinged.last_ping.is_some());
        assert_eq!(
            pinged.with_status(ConnectionStatus::Disconnected).status,
            ConnectionStatus::Disconnected
        );
    }
}
