/*
[INPUT]:  Decoded event frames, raw JSON pushes, lifecycle transitions
[OUTPUT]: Closed ClientEvent enum and its EventKind discriminant
[POS]:    WebSocket layer - event vocabulary shared by dispatcher and subscribers
[UPDATE]: When the server adds named events worth a dedicated variant
*/

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::AssetPayout;

/// Every event the dispatcher delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected { url: String, region: String },
    Reconnected { attempt: u32, url: String },
    Disconnected { reason: String },
    ReconnectsExhausted { attempts: u32 },
    Authenticated(Value),
    AuthRejected { message: String },
    BalanceUpdated(Value),
    OrderOpened(Value),
    OrderClosed(Value),
    StreamUpdate(Value),
    CandlesReceived(Value),
    HistoryUpdate(Value),
    PayoutUpdate(Vec<AssetPayout>),
    JsonData(Value),
    Unknown { name: String, data: Value },
}

/// Subscription key for [`ClientEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Reconnected,
    Disconnected,
    ReconnectsExhausted,
    Authenticated,
    AuthRejected,
    BalanceUpdated,
    OrderOpened,
    OrderClosed,
    StreamUpdate,
    CandlesReceived,
    HistoryUpdate,
    PayoutUpdate,
    JsonData,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Reconnected => "reconnected",
            EventKind::Disconnected => "disconnected",
            EventKind::ReconnectsExhausted => "reconnects_exhausted",
            EventKind::Authenticated => "authenticated",
            EventKind::AuthRejected => "auth_rejected",
            EventKind::BalanceUpdated => "balance_updated",
            EventKind::OrderOpened => "order_opened",
            EventKind::OrderClosed => "order_closed",
            EventKind::StreamUpdate => "stream_update",
            EventKind::CandlesReceived => "candles_received",
            EventKind::HistoryUpdate => "history_update",
            EventKind::PayoutUpdate => "payout_update",
            EventKind::JsonData => "json_data",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected { .. } => EventKind::Connected,
            ClientEvent::Reconnected { .. } => EventKind::Reconnected,
            ClientEvent::Disconnected { .. } => EventKind::Disconnected,
            ClientEvent::ReconnectsExhausted { .. } => EventKind::ReconnectsExhausted,
            ClientEvent::Authenticated(_) => EventKind::Authenticated,
            ClientEvent::AuthRejected { .. } => EventKind::AuthRejected,
            ClientEvent::BalanceUpdated(_) => EventKind::BalanceUpdated,
            ClientEvent::OrderOpened(_) => EventKind::OrderOpened,
            ClientEvent::OrderClosed(_) => EventKind::OrderClosed,
            ClientEvent::StreamUpdate(_) => EventKind::StreamUpdate,
            ClientEvent::CandlesReceived(_) => EventKind::CandlesReceived,
            ClientEvent::HistoryUpdate(_) => EventKind::HistoryUpdate,
            ClientEvent::PayoutUpdate(_) => EventKind::PayoutUpdate,
            ClientEvent::JsonData(_) => EventKind::JsonData,
            ClientEvent::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Map a server event name and its payload.
    pub fn from_named(name: &str, data: Value) -> Self {
        match name {
            "successauth" => ClientEvent::Authenticated(data),
            "successupdateBalance" => ClientEvent::BalanceUpdated(data),
            "successopenOrder" => ClientEvent::OrderOpened(data),
            "successcloseOrder" => ClientEvent::OrderClosed(data),
            "updateStream" => ClientEvent::StreamUpdate(data),
            "loadHistoryPeriod" => ClientEvent::CandlesReceived(data),
            "updateHistoryNew" => ClientEvent::HistoryUpdate(data),
            "NotAuthorized" => ClientEvent::AuthRejected {
                message: match &data {
                    Value::Null => "NotAuthorized".to_string(),
                    Value::String(message) => message.clone(),
                    other => other.to_string(),
                },
            },
            other => ClientEvent::Unknown {
                name: other.to_string(),
                data,
            },
        }
    }

    /// Classify a payload that arrived without an event wrapper.
    pub fn from_raw_json(data: Value) -> Self {
        if data.get("balance").is_some() {
            ClientEvent::BalanceUpdated(data)
        } else if data.get("requestId").is_some() {
            ClientEvent::OrderOpened(data)
        } else if data.get("deals").is_some() {
            ClientEvent::OrderClosed(data)
        } else if data.get("candles").is_some()
            || (data.get("asset").is_some() && data.get("period").is_some())
        {
            ClientEvent::CandlesReceived(data)
        } else {
            ClientEvent::JsonData(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("successauth", EventKind::Authenticated)]
    #[case("successupdateBalance", EventKind::BalanceUpdated)]
    #[case("successopenOrder", EventKind::OrderOpened)]
    #[case("successcloseOrder", EventKind::OrderClosed)]
    #[case("updateStream", EventKind::StreamUpdate)]
    #[case("loadHistoryPeriod", EventKind::CandlesReceived)]
    #[case("updateHistoryNew", EventKind::HistoryUpdate)]
    #[case("NotAuthorized", EventKind::AuthRejected)]
    #[case("updateAssets", EventKind::Unknown)]
    fn test_named_event_mapping(#[case] name: &str, #[case] expected: EventKind) {
        assert_eq!(ClientEvent::from_named(name, json!({})).kind(), expected);
    }

    #[test]
    fn test_unknown_keeps_name_and_payload() {
        let event = ClientEvent::from_named("updateCharts", json!([1, 2]));
        assert_eq!(
            event,
            ClientEvent::Unknown {
                name: "updateCharts".to_string(),
                data: json!([1, 2])
            }
        );
    }

    #[test]
    fn test_raw_json_classification() {
        assert_eq!(
            ClientEvent::from_raw_json(json!({"balance": 10, "isDemo": 1})).kind(),
            EventKind::BalanceUpdated
        );
        assert_eq!(
            ClientEvent::from_raw_json(json!({"requestId": "abc", "asset": "EURUSD"})).kind(),
            EventKind::OrderOpened
        );
        assert_eq!(
            ClientEvent::from_raw_json(json!({"deals": [{"id": "1", "profit": 2}]})).kind(),
            EventKind::OrderClosed
        );
        assert_eq!(
            ClientEvent::from_raw_json(json!({"asset": "EURUSD", "period": 60, "data": []})).kind(),
            EventKind::CandlesReceived
        );
        assert_eq!(
            ClientEvent::from_raw_json(json!({"serverTime": 1})).kind(),
            EventKind::JsonData
        );
    }

    #[test]
    fn test_rejection_message() {
        match ClientEvent::from_named("NotAuthorized", Value::Null) {
            ClientEvent::AuthRejected { message } => assert_eq!(message, "NotAuthorized"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
