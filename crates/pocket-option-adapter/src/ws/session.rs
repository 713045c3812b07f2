/*
[INPUT]:  Endpoint URL, auth frame, session timeouts, event dispatcher
[OUTPUT]: One live WebSocket session: handshake, reader task, frame sends
[POS]:    WebSocket layer - physical connection to a single endpoint
[UPDATE]: When changing handshake steps, reader behaviour or close semantics
*/

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{ORIGIN, USER_AGENT};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::EventDispatcher;
use super::frame::{self, Frame, OPEN_ACK, PONG};
use super::message::ClientEvent;
use crate::config::SessionConfig;
use crate::error::{PocketOptionError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_SAMPLE_LIMIT: usize = 5;
const UNKNOWN_LOG_LIMIT: usize = 10;
const RAW_LOG_MAX_BYTES: usize = 512;

static EVENT_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static UNKNOWN_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Message counters shared across every session a manager opens.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
}

#[derive(Debug, Clone, PartialEq)]
enum AuthState {
    Pending,
    Accepted,
    Rejected(String),
}

/// One physical connection to one endpoint.
#[derive(Debug)]
pub struct TransportSession {
    url: String,
    sid: String,
    sink: Arc<Mutex<Option<WsSink>>>,
    open: Arc<AtomicBool>,
    shutdown: CancellationToken,
    closed: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<SessionCounters>,
}

impl TransportSession {
    /// Open the socket, run the handshake, send `auth_frame` and wait for the
    /// server to accept it. Decoded frames flow to `dispatcher` from then on.
    pub async fn connect(
        url: &str,
        auth_frame: &str,
        config: &SessionConfig,
        dispatcher: Arc<EventDispatcher>,
        counters: Arc<SessionCounters>,
    ) -> Result<Self> {
        let request = build_request(url, config)?;

        debug!(%url, "opening websocket");
        let (mut stream, _response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| PocketOptionError::ConnectionFailed {
                reason: format!(
                    "connect to {url} timed out after {}ms",
                    config.connect_timeout.as_millis()
                ),
            })?
            .map_err(|err| PocketOptionError::ConnectionFailed {
                reason: format!("connect to {url} failed: {err}"),
            })?;

        let sid = match handshake(&mut stream, auth_frame, config).await {
            Ok(sid) => sid,
            Err(err) => {
                let _ = stream.close(None).await;
                return Err(err);
            }
        };
        counters.messages_sent.fetch_add(2, Ordering::Relaxed);

        let (sink, source) = stream.split();
        let sink = Arc::new(Mutex::new(Some(sink)));
        let open = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();
        let (auth_tx, mut auth_rx) = watch::channel(AuthState::Pending);

        let reader = SessionReader {
            url: url.to_string(),
            sink: sink.clone(),
            open: open.clone(),
            shutdown: shutdown.clone(),
            closed: closed.clone(),
            dispatcher,
            auth: auth_tx,
            counters: counters.clone(),
            receive_timeout: config.receive_timeout,
        };
        let handle = tokio::spawn(reader.run(source));

        let session = Self {
            url: url.to_string(),
            sid,
            sink,
            open,
            shutdown,
            closed,
            reader: Mutex::new(Some(handle)),
            counters,
        };

        let outcome = tokio::time::timeout(config.auth_timeout, async {
            auth_rx
                .wait_for(|state| *state != AuthState::Pending)
                .await
                .map(|state| state.clone())
        })
        .await;

        match outcome {
            Ok(Ok(AuthState::Accepted)) => {
                info!(%url, sid = %session.sid, "websocket session authenticated");
                Ok(session)
            }
            Ok(Ok(AuthState::Rejected(message))) => {
                session.close().await;
                Err(PocketOptionError::Authentication { message })
            }
            Ok(Ok(AuthState::Pending)) | Ok(Err(_)) => {
                session.close().await;
                Err(PocketOptionError::ConnectionFailed {
                    reason: format!("{url} closed before authentication completed"),
                })
            }
            Err(_) => {
                session.close().await;
                Err(PocketOptionError::HandshakeTimeout {
                    step: "authentication",
                    timeout_ms: config.auth_timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Resolves once the reader has stopped, whatever the cause.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Send one text frame. Fails with `NotConnected` once the socket is gone.
    pub async fn send(&self, payload: &str) -> Result<()> {
        if !self.is_open() {
            return Err(PocketOptionError::NotConnected);
        }

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(PocketOptionError::NotConnected)?;
        if let Err(err) = sink.send(WsMessage::Text(payload.to_string().into())).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(PocketOptionError::websocket(err));
        }

        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        debug!(url = %self.url, frame = %frame::truncate_for_log(payload, RAW_LOG_MAX_BYTES), "frame sent");
        Ok(())
    }

    /// Stop the reader, close the socket and wait for the reader to finish.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.open.store(false, Ordering::SeqCst);

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
            let _ = sink.close().await;
        }

        if let Some(handle) = self.reader.lock().await.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(READER_JOIN_TIMEOUT, handle).await.is_err() {
                warn!(url = %self.url, "session reader did not stop in time; aborting");
                abort.abort();
            }
        }
        self.closed.cancel();
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn build_request(url: &str, config: &SessionConfig) -> Result<Request> {
    url::Url::parse(url)?;
    let mut request = url.into_client_request().map_err(PocketOptionError::websocket)?;
    let headers = request.headers_mut();
    headers.insert(
        ORIGIN,
        HeaderValue::from_str(&config.origin)
            .map_err(|err| PocketOptionError::Config(format!("invalid origin header: {err}")))?,
    );
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent)
            .map_err(|err| PocketOptionError::Config(format!("invalid user agent: {err}")))?,
    );
    Ok(request)
}

/// open -> ack -> ack echo -> auth. Returns the transport sid.
async fn handshake(stream: &mut WsStream, auth_frame: &str, config: &SessionConfig) -> Result<String> {
    let sid = match recv_handshake_frame(stream, "open", config.handshake_timeout).await? {
        Frame::Open { sid } => sid,
        other => {
            return Err(PocketOptionError::InvalidResponse(format!(
                "expected open frame, got {other:?}"
            )));
        }
    };

    stream
        .send(WsMessage::Text(OPEN_ACK.to_string().into()))
        .await
        .map_err(PocketOptionError::websocket)?;

    match recv_handshake_frame(stream, "connect ack", config.handshake_timeout).await? {
        Frame::Connect { sid: Some(ack_sid) } => {
            if config.strict_sid_echo && ack_sid != sid {
                return Err(PocketOptionError::InvalidResponse(format!(
                    "connect ack sid {ack_sid} does not match {sid}"
                )));
            }
        }
        other => {
            return Err(PocketOptionError::InvalidResponse(format!(
                "expected connect ack with sid, got {other:?}"
            )));
        }
    }

    stream
        .send(WsMessage::Text(auth_frame.to_string().into()))
        .await
        .map_err(PocketOptionError::websocket)?;

    debug!(%sid, "handshake complete; auth frame sent");
    Ok(sid)
}

async fn recv_handshake_frame(
    stream: &mut WsStream,
    step: &'static str,
    wait: Duration,
) -> Result<Frame> {
    let deadline = Instant::now() + wait;
    loop {
        let next = tokio::time::timeout_at(deadline, stream.next())
            .await
            .map_err(|_| PocketOptionError::HandshakeTimeout {
                step,
                timeout_ms: wait.as_millis() as u64,
            })?;

        let frame = match next {
            Some(Ok(WsMessage::Text(text))) => frame::decode_text(text.as_str()),
            Some(Ok(WsMessage::Binary(bytes))) => frame::decode_binary(&bytes),
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(PocketOptionError::ConnectionFailed {
                    reason: format!("socket closed while waiting for {step}"),
                });
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(PocketOptionError::websocket(err)),
        };

        if frame == Frame::Ping {
            stream
                .send(WsMessage::Text(PONG.to_string().into()))
                .await
                .map_err(PocketOptionError::websocket)?;
            continue;
        }
        return Ok(frame);
    }
}

struct SessionReader {
    url: String,
    sink: Arc<Mutex<Option<WsSink>>>,
    open: Arc<AtomicBool>,
    shutdown: CancellationToken,
    closed: CancellationToken,
    dispatcher: Arc<EventDispatcher>,
    auth: watch::Sender<AuthState>,
    counters: Arc<SessionCounters>,
    receive_timeout: Duration,
}

impl SessionReader {
    async fn run(self, mut source: WsSource) {
        let mut pending_binary: Option<String> = None;

        let reason = loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break None,
                next = tokio::time::timeout(self.receive_timeout, source.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    debug!(url = %self.url, "no frame within receive timeout");
                    continue;
                }
                Ok(None) => break Some("stream ended".to_string()),
                Ok(Some(Err(err))) => break Some(err.to_string()),
                Ok(Some(Ok(message))) => message,
            };

            let frame = match message {
                WsMessage::Text(text) => frame::decode_text(text.as_str()),
                WsMessage::Binary(bytes) => frame::decode_binary(&bytes),
                WsMessage::Close(close) => {
                    break Some(match close {
                        Some(close) => format!(
                            "server closed socket: {} {}",
                            u16::from(close.code),
                            close.reason.as_str()
                        ),
                        None => "server closed socket".to_string(),
                    });
                }
                _ => continue,
            };
            self.counters.messages_received.fetch_add(1, Ordering::Relaxed);

            if let ControlFlow::Break(reason) = self.handle_frame(frame, &mut pending_binary).await {
                break Some(reason);
            }
        };

        self.open.store(false, Ordering::SeqCst);
        self.closed.cancel();
        if let Some(reason) = reason {
            info!(url = %self.url, %reason, "websocket session closed");
            self.dispatcher
                .emit(&ClientEvent::Disconnected { reason })
                .await;
        }
    }

    async fn handle_frame(
        &self,
        frame: Frame,
        pending_binary: &mut Option<String>,
    ) -> ControlFlow<String> {
        match frame {
            Frame::Ping => {
                let mut guard = self.sink.lock().await;
                let Some(sink) = guard.as_mut() else {
                    return ControlFlow::Break("socket released".to_string());
                };
                if let Err(err) = sink.send(WsMessage::Text(PONG.to_string().into())).await {
                    return ControlFlow::Break(format!("pong failed: {err}"));
                }
                self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Frame::Pong | Frame::Open { .. } | Frame::Connect { .. } => {
                debug!(url = %self.url, ?frame, "control frame ignored");
            }
            Frame::Disconnect => {
                return ControlFlow::Break("server closed namespace".to_string());
            }
            Frame::Event { name, data } => {
                self.deliver(ClientEvent::from_named(&name, data)).await;
            }
            Frame::BinaryEvent { name, attachments } => {
                debug!(url = %self.url, %name, attachments, "awaiting binary attachment");
                *pending_binary = Some(name);
            }
            Frame::Json(value) => {
                let event = match pending_binary.take() {
                    Some(name) => ClientEvent::from_named(&name, value),
                    None => ClientEvent::from_raw_json(value),
                };
                self.deliver(event).await;
            }
            Frame::Payouts(rows) => {
                if let Some(name) = pending_binary.take() {
                    debug!(url = %self.url, %name, "attachment carried a payout listing");
                }
                self.deliver(ClientEvent::PayoutUpdate(rows)).await;
            }
            Frame::Unknown(raw) => {
                if let Some(name) = pending_binary.take() {
                    debug!(url = %self.url, %name, "attachment undecodable; header discarded");
                }
                log_unknown_frame(&raw);
            }
        }
        ControlFlow::Continue(())
    }

    async fn deliver(&self, event: ClientEvent) {
        match &event {
            ClientEvent::Authenticated(_) => {
                self.auth.send_replace(AuthState::Accepted);
            }
            ClientEvent::AuthRejected { message } => {
                warn!(url = %self.url, %message, "server rejected session");
                self.auth.send_replace(AuthState::Rejected(message.clone()));
            }
            _ => {}
        }
        log_event_sample_once(&event);
        self.dispatcher.emit(&event).await;
    }
}

fn log_event_sample_once(event: &ClientEvent) {
    let count = EVENT_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < EVENT_SAMPLE_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = EVENT_SAMPLE_LIMIT,
            event = %event.kind(),
            "ws event sample"
        );
    }
}

fn log_unknown_frame(raw: &str) {
    let count = UNKNOWN_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < UNKNOWN_LOG_LIMIT {
        let preview = frame::truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = UNKNOWN_LOG_LIMIT,
            bytes = raw.len(),
            frame = %preview,
            "ws frame unrecognized; dropped"
        );
    }
}
