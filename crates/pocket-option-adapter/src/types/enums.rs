/*
[INPUT]:  Wire vocabulary (order actions, settlement outcomes, candle periods)
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for protocol communication
[UPDATE]: When the broker adds timeframes or order outcomes
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PocketOptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Call,
    Put,
}

impl OrderDirection {
    /// Value of the `action` field in the order frame.
    pub fn as_action(&self) -> &'static str {
        match self {
            OrderDirection::Call => "call",
            OrderDirection::Put => "put",
        }
    }

    /// Server pushes encode the direction as `command`: 0 = call, 1 = put.
    pub fn from_command(command: i64) -> Self {
        if command == 0 {
            OrderDirection::Call
        } else {
            OrderDirection::Put
        }
    }
}

impl FromStr for OrderDirection {
    type Err = PocketOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "call" | "up" | "buy" => Ok(OrderDirection::Call),
            "put" | "down" | "sell" => Ok(OrderDirection::Put),
            other => Err(PocketOptionError::InvalidParameter(format!(
                "unknown order direction: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Win,
    Lose,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Win | OrderStatus::Lose)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// How the facade keeps the session alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Ping plus a slow reconnect monitor.
    #[default]
    Simple,
    /// Ping, health check and fast bounded reconnection.
    Persistent,
}

/// Candle period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    S1,
    S5,
    S10,
    S15,
    S30,
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    MN1,
}

impl TimeFrame {
    pub const ALL: [TimeFrame; 14] = [
        TimeFrame::S1,
        TimeFrame::S5,
        TimeFrame::S10,
        TimeFrame::S15,
        TimeFrame::S30,
        TimeFrame::M1,
        TimeFrame::M5,
        TimeFrame::M15,
        TimeFrame::M30,
        TimeFrame::H1,
        TimeFrame::H4,
        TimeFrame::D1,
        TimeFrame::W1,
        TimeFrame::MN1,
    ];

    pub fn seconds(&self) -> u32 {
        match self {
            TimeFrame::S1 => 1,
            TimeFrame::S5 => 5,
            TimeFrame::S10 => 10,
            TimeFrame::S15 => 15,
            TimeFrame::S30 => 30,
            TimeFrame::M1 => 60,
            TimeFrame::M5 => 300,
            TimeFrame::M15 => 900,
            TimeFrame::M30 => 1800,
            TimeFrame::H1 => 3600,
            TimeFrame::H4 => 14400,
            TimeFrame::D1 => 86400,
            TimeFrame::W1 => 604800,
            TimeFrame::MN1 => 2592000,
        }
    }

    pub fn from_seconds(seconds: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tf| tf.seconds() == seconds)
    }
}

impl FromStr for TimeFrame {
    type Err = PocketOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tf = match s {
            "1s" => TimeFrame::S1,
            "5s" => TimeFrame::S5,
            "10s" => TimeFrame::S10,
            "15s" => TimeFrame::S15,
            "30s" => TimeFrame::S30,
            "1m" => TimeFrame::M1,
            "5m" => TimeFrame::M5,
            "15m" => TimeFrame::M15,
            "30m" => TimeFrame::M30,
            "1h" => TimeFrame::H1,
            "4h" => TimeFrame::H4,
            "1d" => TimeFrame::D1,
            "1w" => TimeFrame::W1,
            "1M" => TimeFrame::MN1,
            other => {
                return Err(PocketOptionError::InvalidParameter(format!(
                    "unknown timeframe: {other}"
                )));
            }
        };
        Ok(tf)
    }
}
