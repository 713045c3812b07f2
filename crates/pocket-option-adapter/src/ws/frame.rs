/*
[INPUT]:  Raw text/binary WebSocket payloads; outbound request parameters
[OUTPUT]: Classified Frame values; serialized request frames
[POS]:    WebSocket layer - wire codec for the broker's Socket.IO subset
[UPDATE]: When the server introduces new frame prefixes or request shapes
*/

use std::str::FromStr;

use serde_json::{Value, json};

use crate::types::{AssetPayout, OrderRequest};
use crate::types::models::value_helpers;

pub const OPEN_ACK: &str = "40";
pub const PONG: &str = "3";
/// Application-level keep-alive ping.
pub const KEEPALIVE_PING: &str = r#"42["ps"]"#;
pub const BALANCE_REQUEST: &str = r#"42["getBalance"]"#;

const ORDER_OPTION_TYPE: u32 = 100;

/// One classified protocol unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `0{"sid":..}`: transport open, first handshake frame.
    Open { sid: String },
    /// `40` / `40{"sid":..}`: namespace connect ack.
    Connect { sid: Option<String> },
    /// `41`: server closed the namespace.
    Disconnect,
    Ping,
    Pong,
    /// `42["name",data]`
    Event { name: String, data: Value },
    /// `45N-["name",{"_placeholder":true,..}]`: the payload follows as the next binary frame.
    BinaryEvent { name: String, attachments: usize },
    /// Bare JSON payload without event wrapper.
    Json(Value),
    /// `[[5,...],...]` asset payout listing.
    Payouts(Vec<AssetPayout>),
    Unknown(String),
}

pub fn decode_text(raw: &str) -> Frame {
    match raw {
        "2" => return Frame::Ping,
        "3" => return Frame::Pong,
        "40" => return Frame::Connect { sid: None },
        "41" => return Frame::Disconnect,
        _ => {}
    }

    if let Some(body) = raw.strip_prefix("42") {
        return decode_event(body).unwrap_or_else(|| Frame::Unknown(raw.to_string()));
    }
    if let Some(body) = raw.strip_prefix("40") {
        return match serde_json::from_str::<Value>(body) {
            Ok(value) => Frame::Connect {
                sid: value_helpers::string_field(&value, "sid"),
            },
            Err(_) => Frame::Unknown(raw.to_string()),
        };
    }
    if let Some(body) = raw.strip_prefix("45") {
        return decode_binary_event(body).unwrap_or_else(|| Frame::Unknown(raw.to_string()));
    }
    if let Some(body) = raw.strip_prefix('0') {
        let sid = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| value_helpers::string_field(&value, "sid"));
        return match sid {
            Some(sid) => Frame::Open { sid },
            None => Frame::Unknown(raw.to_string()),
        };
    }
    if raw.starts_with("[[5,") {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return Frame::Payouts(decode_payouts(&value));
        }
        return Frame::Unknown(raw.to_string());
    }
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return Frame::Json(value);
        }
    }

    Frame::Unknown(raw.to_string())
}

/// Binary payloads are UTF-8 text on this backend.
pub fn decode_binary(bytes: &[u8]) -> Frame {
    match std::str::from_utf8(bytes) {
        Ok(text) => decode_text(text),
        Err(_) => Frame::Unknown(format!("<{} non-utf8 bytes>", bytes.len())),
    }
}

fn decode_event(body: &str) -> Option<Frame> {
    let Value::Array(mut items) = serde_json::from_str::<Value>(body).ok()? else {
        return None;
    };
    if items.is_empty() {
        return None;
    }
    let data = if items.len() > 1 {
        items.swap_remove(1)
    } else {
        Value::Null
    };
    let name = items.first()?.as_str()?.to_string();
    Some(Frame::Event { name, data })
}

fn decode_binary_event(body: &str) -> Option<Frame> {
    let (count, rest) = body.split_once('-')?;
    let attachments = count.parse::<usize>().ok()?;
    let Value::Array(items) = serde_json::from_str::<Value>(rest).ok()? else {
        return None;
    };
    let name = items.first()?.as_str()?.to_string();
    Some(Frame::BinaryEvent { name, attachments })
}

fn decode_payouts(value: &Value) -> Vec<AssetPayout> {
    let Some(rows) = value.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            if row.len() <= 5 {
                return None;
            }
            Some(AssetPayout {
                id: row[0].as_i64()?,
                symbol: row[1].as_str()?.to_string(),
                name: row[2].as_str().unwrap_or_default().to_string(),
                kind: row[3].as_str().unwrap_or_default().to_string(),
                payout: value_helpers::decimal(&row[5])?,
            })
        })
        .collect()
}

pub fn encode_event(name: &str, data: &Value) -> String {
    json!([name, data]).to_string().replacen('[', "42[", 1)
}

pub fn candles_request(asset: &str, period: u32) -> String {
    encode_event("changeSymbol", &json!({ "asset": asset, "period": period }))
}

pub fn order_request(request: &OrderRequest, is_demo: bool) -> String {
    let amount = serde_json::Number::from_str(&request.amount.normalize().to_string())
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(request.amount.to_string()));
    encode_event(
        "openOrder",
        &json!({
            "asset": request.asset,
            "amount": amount,
            "action": request.direction.as_action(),
            "isDemo": if is_demo { 1 } else { 0 },
            "requestId": request.request_id,
            "optionType": ORDER_OPTION_TYPE,
            "time": request.duration,
        }),
    )
}

/// Clip a payload for logging without splitting a UTF-8 sequence.
pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...<truncated {} bytes>", &value[..end], value.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderDirection;
    use rstest::rstest;
    use rust_decimal::Decimal;

    #[rstest]
    #[case("2", Frame::Ping)]
    #[case("3", Frame::Pong)]
    #[case("40", Frame::Connect { sid: None })]
    #[case("41", Frame::Disconnect)]
    #[case(r#"40{"sid":"ns-1"}"#, Frame::Connect { sid: Some("ns-1".to_string()) })]
    #[case(
        r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
        Frame::Open { sid: "abc".to_string() }
    )]
    #[case(
        r#"451-["successupdateBalance",{"_placeholder":true,"num":0}]"#,
        Frame::BinaryEvent { name: "successupdateBalance".to_string(), attachments: 1 }
    )]
    #[case(r#"42["successauth",{"id":"x"}]"#, Frame::Event { name: "successauth".to_string(), data: json!({"id":"x"}) })]
    #[case(r#"42["ps"]"#, Frame::Event { name: "ps".to_string(), data: Value::Null })]
    #[case(r#"{"balance":12.5}"#, Frame::Json(json!({"balance": 12.5})))]
    fn test_decode_text(#[case] raw: &str, #[case] expected: Frame) {
        assert_eq!(decode_text(raw), expected);
    }

    #[rstest]
    #[case("0{}")]
    #[case("42not-json")]
    #[case("42[]")]
    #[case("451-oops")]
    #[case("hello")]
    #[case("")]
    fn test_malformed_frames_are_unknown(#[case] raw: &str) {
        assert!(matches!(decode_text(raw), Frame::Unknown(_)));
    }

    #[test]
    fn test_decode_binary_as_utf8() {
        let frame = decode_binary(br#"{"requestId":"r1","asset":"EURUSD"}"#);
        assert_eq!(frame, Frame::Json(json!({"requestId": "r1", "asset": "EURUSD"})));
        assert!(matches!(decode_binary(&[0xff, 0xfe]), Frame::Unknown(_)));
    }

    #[test]
    fn test_decode_payout_listing() {
        let raw = r##"[[5,"#AAPL","Apple","stock",2,50,60,30,3,0,170,0],[66,"EURUSD_otc","EUR/USD OTC","currency",2,92],[1,"short"]]"##;
        match decode_text(raw) {
            Frame::Payouts(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].symbol, "#AAPL");
                assert_eq!(rows[0].payout, Decimal::from(50));
                assert_eq!(rows[1].id, 66);
                assert_eq!(rows[1].kind, "currency");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_request_frames() {
        assert_eq!(candles_request("EURUSD_otc", 60), r#"42["changeSymbol",{"asset":"EURUSD_otc","period":60}]"#);

        let request = OrderRequest {
            asset: "EURUSD_otc".to_string(),
            amount: Decimal::new(1050, 2),
            direction: OrderDirection::Put,
            duration: 60,
            request_id: "req-1".to_string(),
        };
        let frame = order_request(&request, true);
        assert!(frame.starts_with(r#"42["openOrder","#));
        let body: Value = serde_json::from_str(&frame[2..]).unwrap();
        assert_eq!(body[1]["amount"], json!(10.5));
        assert_eq!(body[1]["action"], "put");
        assert_eq!(body[1]["isDemo"], 1);
        assert_eq!(body[1]["requestId"], "req-1");
        assert_eq!(body[1]["optionType"], 100);
        assert_eq!(body[1]["time"], 60);
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        assert_eq!(truncate_for_log("short", 10), "short");
        let clipped = truncate_for_log("ééééé", 3);
        assert!(clipped.starts_with('é'));
        assert!(clipped.contains("truncated"));
    }
}
