/*
[INPUT]:  Client scenarios against an in-process mock socket server
[OUTPUT]: Test results for the client facade and request correlation
[POS]:    Integration tests - client operations
[UPDATE]: When client operations or correlation rules change
*/

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockOptions, MockServer, Responder, TEST_SSID, connected_client, fast_config, next_event, watch_events};
use pocket_option_adapter::{
    CallbackResult, ClientConfig, ClientEvent, EventKind, OrderDirection, OrderStatus, PocketOptionClient, PocketOptionError,
    TimeFrame,
};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;

fn text(frame: impl Into<String>) -> Message {
    let frame: String = frame.into();
    Message::Text(frame.into())
}

fn event_body(frame: &str, name: &str) -> Option<Value> {
    let body = frame.strip_prefix("42")?;
    let items: Vec<Value> = serde_json::from_str(body).ok()?;
    if items.first()?.as_str()? != name {
        return None;
    }
    items.get(1).cloned()
}

fn balance_responder() -> Responder {
    Arc::new(|frame: &str| {
        if frame == r#"42["getBalance"]"# {
            vec![
                text(r#"451-["successupdateBalance",{"_placeholder":true,"num":0}]"#),
                Message::Binary(br#"{"balance":1000.5,"currency":"USD","isDemo":1}"#.to_vec().into()),
            ]
        } else {
            Vec::new()
        }
    })
}

fn order_responder() -> Responder {
    Arc::new(|frame: &str| {
        let Some(order) = event_body(frame, "openOrder") else {
            return Vec::new();
        };
        let reply = json!([
            "successopenOrder",
            {
                "id": "srv-1",
                "requestId": order["requestId"],
                "asset": order["asset"],
                "amount": order["amount"],
                "action": order["action"],
                "time": order["time"],
            }
        ]);
        vec![text(format!("42{reply}"))]
    })
}

fn candle_responder() -> Responder {
    Arc::new(|frame: &str| {
        let Some(request) = event_body(frame, "changeSymbol") else {
            return Vec::new();
        };
        let reply = json!([
            "loadHistoryPeriod",
            {
                "asset": request["asset"],
                "period": request["period"],
                "candles": [
                    [1_700_000_000, 1.10, 1.09, 1.12, 1.11],
                    [1_700_000_060, 1.11, 1.10, 1.13, 1.12],
                    [1_700_000_120, 1.12, 1.11, 1.14, 1.13],
                ],
            }
        ]);
        vec![text(format!("42{reply}"))]
    })
}

#[tokio::test]
async fn test_connect_returns_false_when_no_candidate_reachable() {
    let client = PocketOptionClient::new(TEST_SSID, fast_config()).unwrap();
    let unreachable = vec!["ws://127.0.0.1:1/socket.io/?EIO=4&transport=websocket".to_string()];
    assert!(!client.connect(Some(&unreachable)).await.unwrap());
    assert!(!client.is_connected().await);

    let empty: Vec<String> = Vec::new();
    assert!(!client.connect(Some(&empty)).await.unwrap());
}

#[tokio::test]
async fn test_connect_performs_handshake_and_auth() {
    let server = MockServer::start(MockOptions::default()).await;
    let client = connected_client(&server, fast_config()).await;

    let received = server.received();
    assert_eq!(received[0], "40");
    assert!(received[1].starts_with(r#"42["auth","#));
    assert!(received[1].contains(TEST_SSID));

    let info = client.connection_info().await.unwrap();
    assert_eq!(info.url, server.url);

    let stats = client.get_connection_stats().await;
    assert!(stats.is_connected);
    assert_eq!(stats.successful_connections, 1);
    assert_eq!(stats.current_url.as_deref(), Some(server.url.as_str()));

    client.disconnect().await;
}

#[tokio::test]
async fn test_balance_arrives_as_binary_attachment() {
    let server = MockServer::start(MockOptions {
        responder: Some(balance_responder()),
        ..Default::default()
    })
    .await;
    let client = connected_client(&server, fast_config()).await;

    let balance = assert_ok!(client.get_balance().await);
    assert_eq!(balance.balance, Decimal::new(10005, 1));
    assert_eq!(balance.currency, "USD");
    assert!(balance.is_demo);

    // Fresh cache answers without another request.
    assert_ok!(client.get_balance().await);
    assert_eq!(server.received_matching(r#"42["getBalance"]"#).len(), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_payout_attachment_does_not_capture_next_raw_payload() {
    let server = MockServer::start(MockOptions::default()).await;
    let client = connected_client(&server, fast_config()).await;
    let mut payouts = watch_events(&client, EventKind::PayoutUpdate).await;
    let mut balances = watch_events(&client, EventKind::BalanceUpdated).await;

    server.push_text(r#"451-["updateAssets",{"_placeholder":true,"num":0}]"#);
    server.push(Message::Binary(br##"[[5,"#AAPL","Apple","stock",2,50]]"##.to_vec().into()));
    server.push(Message::Binary(br#"{"balance":777.5,"isDemo":1}"#.to_vec().into()));

    match next_event(&mut payouts, Duration::from_secs(2)).await {
        Some(ClientEvent::PayoutUpdate(rows)) => assert_eq!(rows.len(), 1),
        other => panic!("expected payout update, got {other:?}"),
    }
    match next_event(&mut balances, Duration::from_secs(2)).await {
        Some(ClientEvent::BalanceUpdated(data)) => assert_eq!(data["balance"].as_f64(), Some(777.5)),
        other => panic!("expected raw balance update, got {other:?}"),
    }

    client.disconnect().await;
}

#[tokio::test]
async fn test_balance_unavailable_after_single_refresh() {
    let server = MockServer::start(MockOptions::default()).await;
    let client = connected_client(&server, fast_config()).await;

    let result = client.get_balance().await;
    assert!(matches!(result, Err(PocketOptionError::BalanceUnavailable)));
    assert_eq!(server.received_matching(r#"42["getBalance"]"#).len(), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_unconfirmed_order_returns_provisional_result() {
    let server = MockServer::start(MockOptions::default()).await;
    let mut config = fast_config();
    config.trading.order_timeout = Duration::from_millis(300);
    let client = connected_client(&server, config).await;

    let order = client
        .place_order("EURUSD_otc", Decimal::from(10), OrderDirection::Call, 60)
        .await
        .unwrap();
    assert!(order.provisional);
    assert_eq!(order.status, OrderStatus::Active);
    assert!(order.error_message.is_some());

    let sent = server.received_matching(r#"42["openOrder","#);
    assert_eq!(sent.len(), 1);
    let body = event_body(&sent[0], "openOrder").unwrap();
    assert_eq!(body["requestId"], json!(order.order_id));
    assert_eq!(body["action"], json!("call"));
    assert_eq!(body["isDemo"], json!(1));
    assert_eq!(body["optionType"], json!(100));
    assert_eq!(body["time"], json!(60));

    let active = client.get_active_orders().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].order_id, order.order_id);

    client.disconnect().await;
}

#[tokio::test]
async fn test_confirmed_order_settles_as_win() {
    let server = MockServer::start(MockOptions {
        responder: Some(order_responder()),
        ..Default::default()
    })
    .await;
    let client = connected_client(&server, fast_config()).await;

    let order = client
        .place_order("EURUSD_otc", Decimal::from(25), OrderDirection::Put, 60)
        .await
        .unwrap();
    assert!(!order.provisional);
    assert_eq!(order.direction, OrderDirection::Put);
    assert_eq!(order.amount, Decimal::from(25));

    server.push_text(r#"42["successcloseOrder",{"deals":[{"id":"srv-1","profit":21.5,"percentProfit":86}]}]"#);

    let settled = client.check_win(&order.order_id, Duration::from_secs(3)).await.unwrap();
    assert_eq!(settled.status, OrderStatus::Win);
    assert_eq!(settled.profit, Some(Decimal::new(215, 1)));
    assert!(client.get_active_orders().await.is_empty());

    let by_server_id = client.check_order_result("srv-1").await.unwrap();
    assert_eq!(by_server_id.order_id, order.order_id);

    client.disconnect().await;
}

#[tokio::test]
async fn test_invalid_order_is_rejected_before_sending() {
    let server = MockServer::start(MockOptions::default()).await;
    let client = connected_client(&server, fast_config()).await;

    let unknown_asset = client
        .place_order("NOT_A_SYMBOL", Decimal::from(10), OrderDirection::Call, 60)
        .await;
    assert!(matches!(unknown_asset, Err(PocketOptionError::InvalidParameter(_))));

    assert_err!(
        client
            .place_order("EURUSD_otc", Decimal::from(10), OrderDirection::Call, 1)
            .await
    );
    assert_err!(
        client
            .place_order("EURUSD_otc", Decimal::ZERO, OrderDirection::Call, 60)
            .await
    );

    assert!(server.received_matching(r#"42["openOrder","#).is_empty());
    client.disconnect().await;
}

#[tokio::test]
async fn test_candles_resolve_newest_rows() {
    let server = MockServer::start(MockOptions {
        responder: Some(candle_responder()),
        ..Default::default()
    })
    .await;
    let client = connected_client(&server, fast_config()).await;

    let candles = client
        .get_candles("EURUSD_otc", TimeFrame::M1, 2, None)
        .await
        .unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].timestamp.timestamp(), 1_700_000_060);
    assert_eq!(candles[1].timestamp.timestamp(), 1_700_000_120);
    assert!(candles.iter().all(|candle| candle.high >= candle.low));
    assert_eq!(candles[1].close, Decimal::new(113, 2));

    let sent = server.received_matching(r#"42["changeSymbol","#);
    assert_eq!(sent.len(), 1);
    let body = event_body(&sent[0], "changeSymbol").unwrap();
    assert_eq!(body, json!({"asset": "EURUSD_otc", "period": 60}));

    client.disconnect().await;
}

#[tokio::test]
async fn test_candles_timeout_yields_empty_list() {
    let server = MockServer::start(MockOptions::default()).await;
    let mut config = fast_config();
    config.trading.candle_timeout = Duration::from_millis(300);
    let client = connected_client(&server, config).await;

    let candles = client
        .get_candles("EURUSD_otc", TimeFrame::M1, 10, None)
        .await
        .unwrap();
    assert!(candles.is_empty());

    let recent = client.resilience().errors.recent_errors(1).await;
    assert_eq!(recent[0].error_type, "get_candles_error");
    assert!(recent[0].message.contains("timed out"));

    client.disconnect().await;
}

#[tokio::test]
async fn test_concurrent_candle_requests_share_one_frame() {
    let server = MockServer::start(MockOptions::default()).await;
    let client = connected_client(&server, fast_config()).await;

    let push = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        server.push_text(
            r#"42["loadHistoryPeriod",{"asset":"EURUSD_otc","period":300,"candles":[[1700000000,1.1,1.0,1.2,1.15]]}]"#,
        );
    };
    let (first, second, ()) = tokio::join!(
        client.get_candles("EURUSD_otc", TimeFrame::M5, 5, None),
        client.get_candles("EURUSD_otc", TimeFrame::M5, 5, None),
        push,
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(server.received_matching(r#"42["changeSymbol","#).len(), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_stops_all_sends() {
    let server = MockServer::start(MockOptions::default()).await;
    let client = connected_client(&server, fast_config()).await;

    client.send_message(r#"42["ps"]"#).await.unwrap();
    client.disconnect().await;
    assert!(!client.is_connected().await);

    let before = server.received().len();
    assert!(matches!(
        client.send_message(r#"42["ps"]"#).await,
        Err(PocketOptionError::NotConnected)
    ));
    assert!(matches!(client.get_balance().await, Err(PocketOptionError::NotConnected)));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.received().len(), before);
}

#[tokio::test]
async fn test_stream_update_reaches_callbacks() {
    let server = MockServer::start(MockOptions::default()).await;
    let client = connected_client(&server, fast_config()).await;
    let mut events = watch_events(&client, EventKind::StreamUpdate).await;

    server.push_text(r#"42["updateStream",[["EURUSD_otc",1700000000,1.1234]]]"#);

    match next_event(&mut events, Duration::from_secs(2)).await {
        Some(ClientEvent::StreamUpdate(data)) => {
            assert_eq!(data, json!([["EURUSD_otc", 1_700_000_000, 1.1234]]));
        }
        other => panic!("expected stream update, got {other:?}"),
    }

    client.disconnect().await;
}

#[tokio::test]
async fn test_removed_callback_stops_receiving() {
    let server = MockServer::start(MockOptions::default()).await;
    let client = connected_client(&server, fast_config()).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let id = client
        .add_event_callback(
            EventKind::Unknown,
            Arc::new(move |event: &ClientEvent| -> CallbackResult {
                let _ = tx.send(event.clone());
                Ok(())
            }),
        )
        .await;

    server.push_text(r#"42["somethingNew",{"x":1}]"#);
    assert!(next_event(&mut rx, Duration::from_secs(2)).await.is_some());

    assert!(client.remove_event_callback(EventKind::Unknown, id).await);
    server.push_text(r#"42["somethingNew",{"x":2}]"#);
    assert!(next_event(&mut rx, Duration::from_millis(300)).await.is_none());

    client.disconnect().await;
}

#[tokio::test]
async fn test_captured_auth_frame_is_replayed() {
    let server = MockServer::start(MockOptions::default()).await;
    let captured = r#"42["auth",{"session":"captured-session","isDemo":1,"uid":42,"platform":2}]"#;
    let client = PocketOptionClient::new(captured, ClientConfig {
        mode: pocket_option_adapter::types::ConnectionMode::Persistent,
        ..fast_config()
    })
    .unwrap();
    assert!(client.connect(Some(&server.url_list())).await.unwrap());

    let auth = server.received_matching(r#"42["auth","#);
    assert_eq!(auth.len(), 1);
    let body = event_body(&auth[0], "auth").unwrap();
    assert_eq!(body["session"], json!("captured-session"));
    assert_eq!(body["uid"], json!(42));

    client.disconnect().await;
}
