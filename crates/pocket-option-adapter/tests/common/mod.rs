/*
[INPUT]:  Test scenarios needing a Pocket Option style socket endpoint
[OUTPUT]: In-process mock socket server, frame recorder and config fixtures
[POS]:    Test infrastructure - shared across integration test modules
[UPDATE]: When the handshake or server push behaviour changes
*/

//! Common test utilities for pocket-option-adapter integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pocket_option_adapter::types::ConnectionMode;
use pocket_option_adapter::{CallbackResult, ClientConfig, ClientEvent, EventCallback, EventKind, PocketOptionClient};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;

pub const MOCK_SID: &str = "mock-sid-0001";
pub const TEST_SSID: &str = "test-session-token";

/// Scripted reply to one client text frame.
pub type Responder = Arc<dyn Fn(&str) -> Vec<Message> + Send + Sync>;

#[derive(Clone, Default)]
pub struct MockOptions {
    /// Answer the auth frame with `NotAuthorized`.
    pub reject_auth: bool,
    /// Send the open frame, then never answer.
    pub silent: bool,
    /// Connections beyond this count are dropped before the upgrade.
    pub max_connections: Option<usize>,
    /// From the given connection number on, hold the auth verdict this long.
    pub auth_delay_from: Option<(usize, Duration)>,
    pub responder: Option<Responder>,
}

pub struct MockServer {
    pub url: String,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    control: broadcast::Sender<Message>,
    shutdown: CancellationToken,
}

impl MockServer {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (control, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let server = Self {
            url: format!("ws://{addr}/socket.io/?EIO=4&transport=websocket"),
            received: received.clone(),
            connections: connections.clone(),
            control: control.clone(),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(async move {
            loop {
                let (stream, _) = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(_) => break,
                    },
                };

                let seen = connections.fetch_add(1, Ordering::SeqCst) + 1;
                if options.max_connections.is_some_and(|max| seen > max) {
                    drop(stream);
                    continue;
                }

                tokio::spawn(serve_connection(
                    stream,
                    seen,
                    options.clone(),
                    received.clone(),
                    control.subscribe(),
                    shutdown.clone(),
                ));
            }
        });

        server
    }

    pub fn url_list(&self) -> Vec<String> {
        vec![self.url.clone()]
    }

    /// Every text frame the server received, handshake included.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_matching(&self, prefix: &str) -> Vec<String> {
        self.received()
            .into_iter()
            .filter(|frame| frame.starts_with(prefix))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Push a frame to every live connection.
    pub fn push(&self, message: Message) {
        let _ = self.control.send(message);
    }

    pub fn push_text(&self, text: &str) {
        self.push(Message::Text(text.to_string().into()));
    }

    /// Close every live connection but keep accepting new ones.
    pub fn kick(&self) {
        self.push(Message::Close(None));
    }

    /// Stop accepting and drop every connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_connection(
    stream: TcpStream,
    connection: usize,
    options: MockOptions,
    received: Arc<Mutex<Vec<String>>>,
    mut control: broadcast::Receiver<Message>,
    shutdown: CancellationToken,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    let open = format!(r#"0{{"sid":"{MOCK_SID}","upgrades":[],"pingInterval":25000,"pingTimeout":20000}}"#);
    if ws.send(Message::Text(open.into())).await.is_err() {
        return;
    }

    if options.silent {
        drain_until_closed(&mut ws, &received, &shutdown).await;
        return;
    }

    match next_text(&mut ws, &received).await {
        Some(frame) if frame == "40" => {}
        _ => return,
    }
    let ack = format!(r#"40{{"sid":"{MOCK_SID}"}}"#);
    if ws.send(Message::Text(ack.into())).await.is_err() {
        return;
    }

    if next_text(&mut ws, &received).await.is_none() {
        return;
    }
    if let Some((from, delay)) = options.auth_delay_from {
        if connection >= from {
            tokio::time::sleep(delay).await;
        }
    }
    let verdict = if options.reject_auth {
        r#"42["NotAuthorized"]"#
    } else {
        r#"42["successauth",{"id":"mock"}]"#
    };
    if ws.send(Message::Text(verdict.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            pushed = control.recv() => match pushed {
                Ok(Message::Close(frame)) => {
                    let _ = ws.send(Message::Close(frame)).await;
                    break;
                }
                Ok(message) => {
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_string();
                    received.lock().unwrap().push(text.clone());
                    if let Some(responder) = &options.responder {
                        for reply in responder(&text) {
                            if ws.send(reply).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>, received: &Mutex<Vec<String>>) -> Option<String> {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            let text = text.as_str().to_string();
            received.lock().unwrap().push(text.clone());
            return Some(text);
        }
    }
    None
}

async fn drain_until_closed(
    ws: &mut WebSocketStream<TcpStream>,
    received: &Mutex<Vec<String>>,
    shutdown: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => received.lock().unwrap().push(text.as_str().to_string()),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Config with short intervals so lifecycle tests finish quickly.
pub fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.mode = ConnectionMode::Persistent;
    config.session.connect_timeout = Duration::from_secs(2);
    config.session.handshake_timeout = Duration::from_secs(2);
    config.session.auth_timeout = Duration::from_secs(2);
    config.session.receive_timeout = Duration::from_secs(5);
    config.keep_alive.ping_interval = Duration::from_secs(5);
    config.keep_alive.health_check_interval = Duration::from_secs(5);
    config.keep_alive.ping_stale_after = Duration::from_secs(30);
    config.keep_alive.reconnect_interval = Duration::from_millis(100);
    config.keep_alive.max_reconnect_attempts = 3;
    config.trading.order_timeout = Duration::from_secs(2);
    config.trading.order_poll_interval = Duration::from_millis(20);
    config.trading.candle_timeout = Duration::from_secs(2);
    config.trading.balance_wait = Duration::from_millis(500);
    config
}

pub async fn connected_client(server: &MockServer, config: ClientConfig) -> PocketOptionClient {
    let client = PocketOptionClient::new(TEST_SSID, config).unwrap();
    let connected = client.connect(Some(&server.url_list())).await.unwrap();
    assert!(connected, "client should connect to mock server");
    client
}

/// Callback that forwards every event of `kind` into a channel.
pub async fn watch_events(
    client: &PocketOptionClient,
    kind: EventKind,
) -> tokio::sync::mpsc::UnboundedReceiver<ClientEvent> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let callback: EventCallback = Arc::new(move |event: &ClientEvent| -> CallbackResult {
        let _ = tx.send(event.clone());
        Ok(())
    });
    client.add_event_callback(kind, callback).await;
    rx
}

pub async fn next_event(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<ClientEvent>,
    wait: Duration,
) -> Option<ClientEvent> {
    tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
}

/// Poll `check` until it holds or `wait` elapses.
pub async fn eventually<F>(wait: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
