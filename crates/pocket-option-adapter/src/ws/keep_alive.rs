/*
[INPUT]:  Candidate endpoints, auth frame, keep-alive tunables, dispatcher, resilience context
[OUTPUT]: A supervised session with ping, health and bounded reconnection tasks
[POS]:    WebSocket layer - connection lifecycle manager
[UPDATE]: When changing fallback order, task cadence or reconnect limits
*/

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::EventDispatcher;
use super::frame::KEEPALIVE_PING;
use super::message::ClientEvent;
use super::regions::Endpoint;
use super::session::{SessionCounters, TransportSession};
use crate::config::{KeepAliveConfig, SessionConfig};
use crate::error::{PocketOptionError, Result};
use crate::resilience::ResilienceContext;
use crate::types::{ConnectionInfo, ConnectionMode, ConnectionStats, ConnectionStatus};

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything `KeepAliveManager::new` needs besides the shared collaborators.
#[derive(Debug, Clone)]
pub struct KeepAliveSettings {
    pub auth_frame: String,
    pub mode: ConnectionMode,
    pub auto_reconnect: bool,
    pub keep_alive: KeepAliveConfig,
    pub session: SessionConfig,
}

struct TaskSet {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("keep-alive task did not stop in time; aborting");
                abort.abort();
            }
        }
    }
}

struct Inner {
    settings: KeepAliveSettings,
    dispatcher: Arc<EventDispatcher>,
    resilience: Arc<ResilienceContext>,
    counters: Arc<SessionCounters>,
    candidates: RwLock<Vec<Endpoint>>,
    session: RwLock<Option<Arc<TransportSession>>>,
    info: RwLock<Option<ConnectionInfo>>,
    status: watch::Sender<ConnectionStatus>,
    reconnect_attempts: AtomicU32,
    total_connections: AtomicU64,
    successful_connections: AtomicU64,
    total_reconnects: AtomicU64,
    /// False once `stop` has run; gates `reconnect_now`.
    running: AtomicBool,
    /// Bumped by every `stop`. A connect cycle started under an older value
    /// must not install its session.
    epoch: AtomicU64,
    connect_lock: Mutex<()>,
    ping_task: StdMutex<Option<TaskSet>>,
    background: StdMutex<Option<TaskSet>>,
}

/// Owns the live session and the tasks that keep it alive.
pub struct KeepAliveManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for KeepAliveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAliveManager")
            .field("mode", &self.inner.settings.mode)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl KeepAliveManager {
    pub fn new(
        settings: KeepAliveSettings,
        dispatcher: Arc<EventDispatcher>,
        resilience: Arc<ResilienceContext>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                dispatcher,
                resilience,
                counters: Arc::new(SessionCounters::default()),
                candidates: RwLock::new(Vec::new()),
                session: RwLock::new(None),
                info: RwLock::new(None),
                status,
                reconnect_attempts: AtomicU32::new(0),
                total_connections: AtomicU64::new(0),
                successful_connections: AtomicU64::new(0),
                total_reconnects: AtomicU64::new(0),
                running: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                connect_lock: Mutex::new(()),
                ping_task: StdMutex::new(None),
                background: StdMutex::new(None),
            }),
        }
    }

    /// Run one connect cycle over `candidates`. On success the health and
    /// reconnection tasks are started. Returns false when every candidate failed.
    pub async fn start(&self, candidates: Vec<Endpoint>) -> Result<bool> {
        self.stop().await;
        *self.inner.candidates.write().await = candidates;
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);
        let connected = self.inner.establish(epoch).await;
        if !matches!(connected, Ok(true)) {
            self.inner.running.store(false, Ordering::SeqCst);
            return connected;
        }
        Ok(self.spawn_background(epoch))
    }

    /// Cancel every task, join them, then close the session. A connect cycle
    /// already in its handshake is waited out and its session discarded.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        let background = lock_tasks(&self.inner.background).take();
        if let Some(tasks) = background {
            tasks.shutdown().await;
        }

        let _guard = self.inner.connect_lock.lock().await;
        self.inner.teardown_session().await;
        self.inner.set_status(ConnectionStatus::Disconnected).await;
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    pub async fn send(&self, payload: &str) -> Result<()> {
        let session = self.inner.live_session().await.ok_or(PocketOptionError::NotConnected)?;
        session.send(payload).await
    }

    /// Immediate reconnect outside the reconnection task's cadence. Does
    /// nothing once the manager has been stopped.
    pub async fn reconnect_now(&self) -> Result<bool> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        if !self.inner.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.teardown_session().await;
        if !self.inner.establish(epoch).await? {
            return Ok(false);
        }
        Ok(self.spawn_background(epoch))
    }

    pub async fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.info.read().await.clone()
    }

    pub async fn stats(&self) -> ConnectionStats {
        let inner = &self.inner;
        let info = inner.info.read().await.clone();
        let is_connected = inner.is_connected().await;
        let uptime_secs = info
            .as_ref()
            .filter(|_| is_connected)
            .and_then(|info| info.connected_at)
            .map(|at| (Utc::now() - at).num_seconds());

        ConnectionStats {
            total_connections: inner.total_connections.load(Ordering::Relaxed),
            successful_connections: inner.successful_connections.load(Ordering::Relaxed),
            total_reconnects: inner.total_reconnects.load(Ordering::Relaxed),
            messages_sent: inner.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: inner.counters.messages_received.load(Ordering::Relaxed),
            connection_start_time: info.as_ref().and_then(|info| info.connected_at),
            last_ping_time: info.as_ref().and_then(|info| info.last_ping),
            is_connected,
            current_url: info.as_ref().map(|info| info.url.clone()),
            current_region: info.as_ref().map(|info| info.region.clone()),
            reconnect_attempts: inner.reconnect_attempts.load(Ordering::SeqCst),
            uptime_secs,
            available_endpoints: inner.candidates.read().await.len(),
        }
    }

    /// Start the health and reconnection tasks unless they already run.
    /// Returns false when a `stop` has happened since `epoch` was read.
    fn spawn_background(&self, epoch: u64) -> bool {
        let mut slot = lock_tasks(&self.inner.background);
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        if slot.is_some() {
            return true;
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        if self.inner.settings.mode == ConnectionMode::Persistent {
            handles.push(tokio::spawn(
                self.inner.clone().health_loop(cancel.clone()),
            ));
        }
        if self.inner.settings.auto_reconnect {
            handles.push(tokio::spawn(
                self.inner.clone().reconnect_loop(cancel.clone(), epoch),
            ));
        }

        *slot = Some(TaskSet { cancel, handles });
        true
    }
}

impl Drop for KeepAliveManager {
    fn drop(&mut self) {
        for slot in [&self.inner.background, &self.inner.ping_task] {
            if let Some(tasks) = lock_tasks(slot).take() {
                tasks.cancel.cancel();
            }
        }
    }
}

fn lock_tasks(slot: &StdMutex<Option<TaskSet>>) -> std::sync::MutexGuard<'_, Option<TaskSet>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    async fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
        let mut info = self.info.write().await;
        if let Some(current) = info.as_ref() {
            *info = Some(current.with_status(status));
        }
    }

    async fn live_session(&self) -> Option<Arc<TransportSession>> {
        if *self.status.borrow() != ConnectionStatus::Connected {
            return None;
        }
        self.session
            .read()
            .await
            .as_ref()
            .filter(|session| session.is_open())
            .cloned()
    }

    async fn is_connected(&self) -> bool {
        if self.live_session().await.is_some() {
            return true;
        }
        if *self.status.borrow() == ConnectionStatus::Connected {
            debug!("socket closed under a connected status; marking disconnected");
            self.set_status(ConnectionStatus::Disconnected).await;
        }
        false
    }

    /// Try each candidate in order. Authentication rejection aborts the cycle.
    async fn establish(self: &Arc<Self>, epoch: u64) -> Result<bool> {
        let _guard = self.connect_lock.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("manager stopped; connect cycle skipped");
            return Ok(false);
        }
        let candidates = self.candidates.read().await.clone();
        if candidates.is_empty() {
            warn!("no candidate endpoints to connect to");
            self.set_status(ConnectionStatus::Disconnected).await;
            return Ok(false);
        }

        self.set_status(ConnectionStatus::Connecting).await;
        for endpoint in &candidates {
            self.total_connections.fetch_add(1, Ordering::Relaxed);
            info!(region = %endpoint.name, url = %endpoint.url, "connecting");

            let attempt = TransportSession::connect(
                &endpoint.url,
                &self.settings.auth_frame,
                &self.settings.session,
                self.dispatcher.clone(),
                self.counters.clone(),
            )
            .await;

            match attempt {
                Ok(session) => {
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        info!(region = %endpoint.name, "manager stopped during handshake; closing session");
                        session.close().await;
                        return Ok(false);
                    }
                    self.install(endpoint, Arc::new(session)).await;
                    return Ok(true);
                }
                Err(err) if err.is_auth_error() => {
                    self.resilience.record(&err, "connect").await;
                    self.set_status(ConnectionStatus::Disconnected).await;
                    return Err(err);
                }
                Err(err) => {
                    warn!(region = %endpoint.name, error = %err, "endpoint failed; trying next");
                    self.resilience.record(&err, "connect").await;
                }
            }
        }

        warn!(candidates = candidates.len(), "all endpoints failed");
        self.set_status(ConnectionStatus::Disconnected).await;
        Ok(false)
    }

    async fn install(self: &Arc<Self>, endpoint: &Endpoint, session: Arc<TransportSession>) {
        let now = Utc::now();
        let attempts = self.reconnect_attempts.swap(0, Ordering::SeqCst);
        let region = endpoint.name.clone();

        let previous_ping = lock_tasks(&self.ping_task).take();
        if let Some(ping) = previous_ping {
            ping.shutdown().await;
        }
        let previous = self.session.write().await.take();
        if let Some(previous) = previous {
            debug!(url = %previous.url(), "closing replaced session");
            previous.close().await;
        }

        *self.session.write().await = Some(session.clone());
        *self.info.write().await = Some(ConnectionInfo {
            url: endpoint.url.clone(),
            region: region.clone(),
            status: ConnectionStatus::Connected,
            connected_at: Some(now),
            last_ping: None,
            reconnect_attempts: attempts,
        });
        self.status.send_replace(ConnectionStatus::Connected);
        self.successful_connections.fetch_add(1, Ordering::Relaxed);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().ping_loop(session, cancel.clone()));
        *lock_tasks(&self.ping_task) = Some(TaskSet {
            cancel,
            handles: vec![handle],
        });

        info!(region = %region, url = %endpoint.url, "connected");
        self.dispatcher
            .emit(&ClientEvent::Connected {
                url: endpoint.url.clone(),
                region,
            })
            .await;
    }

    /// Stop the ping task and close the current session.
    async fn teardown_session(&self) {
        let ping = lock_tasks(&self.ping_task).take();
        if let Some(ping) = ping {
            ping.shutdown().await;
        }
        let session = self.session.write().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Mark `session` dead if it is still the current one.
    async fn mark_disconnected(&self, session: &Arc<TransportSession>, reason: &str) -> bool {
        let current = self
            .session
            .read()
            .await
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if !current {
            return false;
        }
        warn!(url = %session.url(), reason, "session marked disconnected");
        self.set_status(ConnectionStatus::Disconnected).await;
        true
    }

    async fn ping_loop(self: Arc<Self>, session: Arc<TransportSession>, cancel: CancellationToken) {
        let interval = self.settings.keep_alive.ping_interval;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = session.closed() => {
                    self.mark_disconnected(&session, "socket closed").await;
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            if !session.is_open() {
                self.mark_disconnected(&session, "socket closed").await;
                break;
            }

            match session.send(KEEPALIVE_PING).await {
                Ok(()) => {
                    let mut info = self.info.write().await;
                    if let Some(current) = info.as_ref() {
                        *info = Some(current.with_last_ping(Utc::now()));
                    }
                }
                Err(err) => {
                    self.resilience.record(&err, "ping").await;
                    let reason = format!("ping failed: {err}");
                    if self.mark_disconnected(&session, &reason).await {
                        self.dispatcher.emit(&ClientEvent::Disconnected { reason }).await;
                    }
                    break;
                }
            }
        }
        debug!(url = %session.url(), "ping task stopped");
    }

    async fn health_loop(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.settings.keep_alive.health_check_interval;
        let stale_after = chrono::Duration::from_std(self.settings.keep_alive.ping_stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *self.status.borrow() != ConnectionStatus::Connected {
                continue;
            }
            let Some(session) = self.session.read().await.clone() else {
                continue;
            };

            let last_seen = self
                .info
                .read()
                .await
                .as_ref()
                .and_then(|info| info.last_ping.or(info.connected_at));
            let stale = last_seen.is_some_and(|at| Utc::now() - at > stale_after);

            let reason = if !session.is_open() {
                "socket closed"
            } else if stale {
                "no successful ping within staleness window"
            } else {
                continue;
            };

            if self.mark_disconnected(&session, reason).await && stale {
                self.dispatcher
                    .emit(&ClientEvent::Disconnected {
                        reason: reason.to_string(),
                    })
                    .await;
            }
        }
        debug!("health task stopped");
    }

    async fn reconnect_loop(self: Arc<Self>, cancel: CancellationToken, epoch: u64) {
        let interval = match self.settings.mode {
            ConnectionMode::Persistent => self.settings.keep_alive.reconnect_interval,
            ConnectionMode::Simple => self.settings.keep_alive.simple_reconnect_interval,
        };
        let max_attempts = self.settings.keep_alive.max_reconnect_attempts;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if self.is_connected().await {
                continue;
            }

            let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
            if attempts >= max_attempts {
                error!(attempts, max_attempts, "reconnect attempts exhausted; giving up");
                self.dispatcher
                    .emit(&ClientEvent::ReconnectsExhausted { attempts })
                    .await;
                break;
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.total_reconnects.fetch_add(1, Ordering::Relaxed);
            info!(attempt, max_attempts, "reconnecting");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = async {
                    self.teardown_session().await;
                    self.establish(epoch).await
                } => outcome,
            };

            match outcome {
                Ok(true) => {
                    let url = self
                        .info
                        .read()
                        .await
                        .as_ref()
                        .map(|info| info.url.clone())
                        .unwrap_or_default();
                    info!(attempt, %url, "reconnected");
                    self.dispatcher
                        .emit(&ClientEvent::Reconnected { attempt, url })
                        .await;
                }
                Ok(false) => {
                    warn!(attempt, max_attempts, "reconnect attempt failed");
                }
                Err(err) => {
                    error!(error = %err, "reconnect aborted: credentials rejected");
                    break;
                }
            }
        }
        debug!("reconnect task stopped");
    }
}
