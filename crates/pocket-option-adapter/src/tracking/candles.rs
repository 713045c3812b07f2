/*
[INPUT]:  Candle push payloads (history, stream, object rows)
[OUTPUT]: CandleKey correlation keys and normalized, time-ordered Candle lists
[POS]:    Tracking layer - candle correlation and parsing
[UPDATE]: When the server changes candle row layouts
*/

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Candle;
use crate::types::models::value_helpers::{decimal, decimal_field, string_field, timestamp};

/// Correlation key for candle requests. Asset and period are kept apart so
/// that no pair of distinct requests can produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandleKey {
    pub asset: String,
    pub period: u32,
}

impl CandleKey {
    pub fn new(asset: impl Into<String>, period: u32) -> Self {
        Self {
            asset: asset.into(),
            period,
        }
    }

    /// Key named by a push payload, if it carries both `asset` and `period`.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let asset = string_field(payload, "asset")?;
        let period = payload.get("period").and_then(|period| {
            period
                .as_u64()
                .or_else(|| period.as_str().and_then(|raw| raw.parse().ok()))
        })?;
        Some(Self::new(asset, u32::try_from(period).ok()?))
    }
}

impl fmt::Display for CandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}s", self.asset, self.period)
    }
}

#[derive(Debug, Clone, Copy)]
enum RowLayout {
    /// `[ts, open, low, high, close, volume?]`
    History,
    /// `[ts, open, close, high, low, volume?]`
    Stream,
}

/// Parse every recognizable row in `payload`, normalized and sorted by time.
pub fn parse_candles(payload: &Value, asset: &str, period: u32) -> Vec<Candle> {
    let (rows, layout) = match payload {
        Value::Array(rows) => (rows.as_slice(), RowLayout::History),
        other => {
            if let Some(rows) = other.get("candles").and_then(Value::as_array) {
                (rows.as_slice(), RowLayout::History)
            } else if let Some(rows) = other.get("data").and_then(Value::as_array) {
                (rows.as_slice(), RowLayout::Stream)
            } else {
                return Vec::new();
            }
        }
    };

    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| match row {
            Value::Object(_) => parse_object_row(row, asset, period),
            Value::Array(fields) => parse_array_row(fields, layout, asset, period),
            _ => None,
        })
        .collect();
    candles.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    candles
}

fn parse_object_row(row: &Value, asset: &str, period: u32) -> Option<Candle> {
    let timestamp = row.get("time").or_else(|| row.get("timestamp")).and_then(timestamp)?;
    Some(build(
        timestamp,
        decimal_field(row, "open")?,
        decimal_field(row, "high")?,
        decimal_field(row, "low")?,
        decimal_field(row, "close")?,
        decimal_field(row, "volume").unwrap_or(Decimal::ZERO),
        asset,
        period,
    ))
}

fn parse_array_row(fields: &[Value], layout: RowLayout, asset: &str, period: u32) -> Option<Candle> {
    if fields.len() < 5 {
        return None;
    }
    let timestamp = timestamp(&fields[0])?;
    let open = decimal(&fields[1])?;
    let (close, high, low) = match layout {
        RowLayout::History => (decimal(&fields[4])?, decimal(&fields[3])?, decimal(&fields[2])?),
        RowLayout::Stream => (decimal(&fields[2])?, decimal(&fields[3])?, decimal(&fields[4])?),
    };
    let volume = fields.get(5).and_then(decimal).unwrap_or(Decimal::ZERO);
    Some(build(timestamp, open, high, low, close, volume, asset, period))
}

#[allow(clippy::too_many_arguments)]
fn build(
    timestamp: chrono::DateTime<chrono::Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    asset: &str,
    period: u32,
) -> Candle {
    Candle {
        timestamp,
        open,
        high: high.max(low),
        low: high.min(low),
        close,
        volume,
        asset: asset.to_string(),
        period,
    }
}
