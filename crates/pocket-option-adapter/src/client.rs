/*
[INPUT]:  SSID, ClientConfig, caller requests (balance, orders, candles, raw frames)
[OUTPUT]: Public client surface over the keep-alive manager, correlator and resilience context
[POS]:    Client layer - facade
[UPDATE]: When adding public operations or changing validation rules
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::FutureExt;
use rust_decimal::Decimal;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::SessionCredentials;
use crate::config::ClientConfig;
use crate::error::{PocketOptionError, Result};
use crate::resilience::{
    HealthProbe, HealthReport, MonitorOptions, OperationCategory, ResilienceContext,
};
use crate::tracking::{CandleKey, Correlator};
use crate::types::{
    Balance, Candle, ConnectionInfo, ConnectionStats, OrderDirection, OrderRequest, OrderResult,
    OrderStatus, TimeFrame, is_known_asset,
};
use crate::ws::frame::{self, BALANCE_REQUEST};
use crate::ws::regions::resolve_candidates;
use crate::ws::{
    EventCallback, EventDispatcher, EventKind, EventSubscriber, KeepAliveManager,
    KeepAliveSettings, SubscriptionId,
};

const WEBSOCKET_PROBE: &str = "websocket";
const CHECK_WIN_POLL: Duration = Duration::from_secs(1);
const PROVISIONAL_NOTE: &str = "Timeout waiting for server confirmation";

/// Async client for the Pocket Option trading socket.
pub struct PocketOptionClient {
    credentials: SessionCredentials,
    config: ClientConfig,
    dispatcher: Arc<EventDispatcher>,
    correlator: Arc<Correlator>,
    resilience: Arc<ResilienceContext>,
    keep_alive: Arc<KeepAliveManager>,
    correlator_subscribed: OnceCell<()>,
    session_wanted: AtomicBool,
}

impl std::fmt::Debug for PocketOptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketOptionClient")
            .field("is_demo", &self.credentials.is_demo)
            .field("uid", &self.credentials.uid)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

impl PocketOptionClient {
    /// Build a client from a bare session id or a captured `42["auth",...]` frame.
    pub fn new(ssid: &str, config: ClientConfig) -> Result<Self> {
        let credentials = SessionCredentials::parse(ssid, config.is_demo, config.uid, config.platform)?;
        let dispatcher = Arc::new(EventDispatcher::new());
        let resilience = Arc::new(ResilienceContext::new(&config.monitoring));
        let keep_alive = Arc::new(KeepAliveManager::new(
            KeepAliveSettings {
                auth_frame: credentials.auth_frame(),
                mode: config.mode,
                auto_reconnect: config.auto_reconnect,
                keep_alive: config.keep_alive.clone(),
                session: config.session.clone(),
            },
            dispatcher.clone(),
            resilience.clone(),
        ));

        Ok(Self {
            correlator: Arc::new(Correlator::new(credentials.is_demo)),
            credentials,
            config,
            dispatcher,
            resilience,
            keep_alive,
            correlator_subscribed: OnceCell::new(),
            session_wanted: AtomicBool::new(false),
        })
    }

    pub fn is_demo(&self) -> bool {
        self.credentials.is_demo
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn resilience(&self) -> &ResilienceContext {
        &self.resilience
    }

    /// Connect to the first reachable endpoint. `regions` may hold catalog
    /// names or literal URLs; `None` uses the catalog for the account mode.
    /// Returns false when every candidate failed; a rejected session is an error.
    pub async fn connect(&self, regions: Option<&[String]>) -> Result<bool> {
        self.ensure_correlator().await;

        let candidates = resolve_candidates(regions, self.credentials.is_demo);
        info!(
            candidates = candidates.len(),
            mode = ?self.config.mode,
            demo = self.credentials.is_demo,
            "connecting client"
        );

        let connected = self.keep_alive.start(candidates).await?;
        self.session_wanted.store(connected, Ordering::SeqCst);
        if connected {
            self.resilience
                .health
                .register(WEBSOCKET_PROBE, websocket_probe(Arc::downgrade(&self.keep_alive)))
                .await;
            self.resilience.health.start().await;
        }
        Ok(connected)
    }

    /// Stop health monitoring and every keep-alive task, then close the socket.
    /// No frame is sent after this returns.
    pub async fn disconnect(&self) {
        self.session_wanted.store(false, Ordering::SeqCst);
        self.resilience.health.stop().await;
        self.keep_alive.stop().await;
        self.correlator.candle_requests().clear().await;
        info!("client disconnected");
    }

    pub async fn is_connected(&self) -> bool {
        self.keep_alive.is_connected().await
    }

    /// Cached balance when fresh; otherwise one refresh request and a bounded wait.
    pub async fn get_balance(&self) -> Result<Balance> {
        if !self.keep_alive.is_connected().await {
            return Err(PocketOptionError::NotConnected);
        }

        if let Some(balance) = self.correlator.balance() {
            if !self.is_stale(&balance) {
                return Ok(balance);
            }
        }

        let mut updates = self.correlator.subscribe_balance();
        updates.borrow_and_update();
        self.keep_alive.send(BALANCE_REQUEST).await?;

        let refreshed = match tokio::time::timeout(self.config.trading.balance_wait, updates.changed()).await {
            Ok(Ok(())) => updates.borrow_and_update().clone(),
            _ => None,
        };
        match refreshed {
            Some(balance) => Ok(balance),
            None => {
                let err = PocketOptionError::BalanceUnavailable;
                self.resilience.record(&err, "get_balance").await;
                Err(err)
            }
        }
    }

    /// Validate, dispatch and wait for the server to confirm an order. When no
    /// confirmation arrives in time a provisional result is returned and tracked.
    pub async fn place_order(
        &self,
        asset: &str,
        amount: Decimal,
        direction: OrderDirection,
        duration: u32,
    ) -> Result<OrderResult> {
        if !self.keep_alive.is_connected().await {
            return Err(PocketOptionError::NotConnected);
        }
        self.validate_order(asset, amount, duration)?;

        let request = OrderRequest {
            asset: asset.to_string(),
            amount,
            direction,
            duration,
            request_id: Uuid::new_v4().to_string(),
        };
        let payload = frame::order_request(&request, self.credentials.is_demo);

        self.resilience
            .execute_with_monitoring(
                "place_order",
                OperationCategory::Trading,
                MonitorOptions::breaker_only(),
                || self.keep_alive.send(&payload),
            )
            .await
            .map_err(|err| match err {
                PocketOptionError::CircuitOpen { .. } | PocketOptionError::NotConnected => err,
                other => PocketOptionError::OrderPlacement(other.to_string()),
            })?;

        info!(
            request_id = %request.request_id,
            asset,
            %amount,
            direction = direction.as_action(),
            duration,
            "order sent"
        );
        Ok(self.await_order_confirmation(request).await)
    }

    async fn await_order_confirmation(&self, request: OrderRequest) -> OrderResult {
        let deadline = Instant::now() + self.config.trading.order_timeout;
        let poll = self.config.trading.order_poll_interval;

        loop {
            if let Some(order) = self.correlator.order(&request.request_id).await {
                return order;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }

        warn!(request_id = %request.request_id, "order not confirmed in time; returning provisional result");
        let timeout = PocketOptionError::Timeout {
            operation: "order confirmation",
            timeout_ms: self.config.trading.order_timeout.as_millis() as u64,
        };
        self.resilience.record(&timeout, "place_order").await;
        let placed_at = Utc::now();
        let provisional = OrderResult {
            order_id: request.request_id.clone(),
            asset: request.asset,
            amount: request.amount,
            direction: request.direction,
            duration: request.duration,
            status: OrderStatus::Active,
            placed_at,
            expires_at: placed_at + ChronoDuration::seconds(i64::from(request.duration)),
            profit: None,
            payout: None,
            provisional: true,
            error_message: Some(PROVISIONAL_NOTE.to_string()),
        };

        if self.correlator.insert_provisional(provisional.clone()).await {
            return provisional;
        }
        self.correlator
            .order(&request.request_id)
            .await
            .unwrap_or(provisional)
    }

    /// Active or completed order by request id or server id.
    pub async fn check_order_result(&self, order_id: &str) -> Option<OrderResult> {
        self.correlator.order(order_id).await
    }

    pub async fn get_active_orders(&self) -> Vec<OrderResult> {
        self.correlator.active_orders().await
    }

    /// Wait up to `max_wait` for the order to settle.
    pub async fn check_win(&self, order_id: &str, max_wait: Duration) -> Option<OrderResult> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(order) = self.correlator.order(order_id).await {
                if order.status.is_terminal() {
                    return Some(order);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(order_id, "order did not settle within wait");
                return None;
            }
            tokio::time::sleep(CHECK_WIN_POLL.min(deadline - now)).await;
        }
    }

    /// Up to `count` candles at or before `end_time`, oldest first. A request
    /// the server never answers yields an empty list.
    pub async fn get_candles(
        &self,
        asset: &str,
        timeframe: TimeFrame,
        count: usize,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        if !is_known_asset(asset) {
            return Err(PocketOptionError::InvalidParameter(format!("unknown asset: {asset}")));
        }
        if count == 0 {
            return Err(PocketOptionError::InvalidParameter("count must be positive".to_string()));
        }
        self.ensure_connected_for_data().await?;

        let period = timeframe.seconds();
        let key = CandleKey::new(asset, period);
        let requests = self.correlator.candle_requests();
        let registration = requests.register(key.clone(), self.config.trading.candle_timeout).await;

        if registration.is_new {
            let payload = frame::candles_request(asset, period);
            let sent = self
                .resilience
                .execute_with_monitoring(
                    "get_candles",
                    OperationCategory::Data,
                    MonitorOptions::breaker_only(),
                    || self.keep_alive.send(&payload),
                )
                .await;
            if let Err(err) = sent {
                requests.expire(&key, registration.generation).await;
                return Err(err);
            }
        } else {
            debug!(key = %key, "joining outstanding candle request");
        }

        let candles = match requests.wait(&key, registration).await {
            Some(candles) => candles,
            None => {
                warn!(key = %key, "no candle data before deadline; returning empty result");
                let timeout = PocketOptionError::Timeout {
                    operation: "candle request",
                    timeout_ms: self.config.trading.candle_timeout.as_millis() as u64,
                };
                self.resilience.record(&timeout, "get_candles").await;
                Vec::new()
            }
        };
        Ok(select_candles(candles, count, end_time))
    }

    /// Send a raw frame verbatim.
    pub async fn send_message(&self, raw: &str) -> Result<()> {
        self.keep_alive.send(raw).await
    }

    pub async fn add_event_callback(&self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.ensure_correlator().await;
        self.dispatcher.add_callback(kind, callback).await
    }

    pub async fn remove_event_callback(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.dispatcher.remove(kind, id).await
    }

    pub async fn get_connection_stats(&self) -> ConnectionStats {
        self.keep_alive.stats().await
    }

    pub async fn connection_info(&self) -> Option<ConnectionInfo> {
        self.keep_alive.connection_info().await
    }

    pub async fn health_report(&self) -> HealthReport {
        self.resilience.health.report().await
    }

    async fn ensure_correlator(&self) {
        self.correlator_subscribed
            .get_or_init(|| async {
                let subscriber: Arc<dyn EventSubscriber> = self.correlator.clone();
                for kind in Correlator::SUBSCRIBED_KINDS {
                    self.dispatcher.add_subscriber(kind, subscriber.clone()).await;
                }
            })
            .await;
    }

    async fn ensure_connected_for_data(&self) -> Result<()> {
        if self.keep_alive.is_connected().await {
            return Ok(());
        }
        if !self.config.auto_reconnect || !self.session_wanted.load(Ordering::SeqCst) {
            return Err(PocketOptionError::NotConnected);
        }

        for attempt in 1..=self.config.trading.data_reconnect_attempts {
            info!(attempt, "reconnecting before data request");
            if self.keep_alive.reconnect_now().await? {
                return Ok(());
            }
        }
        Err(PocketOptionError::NotConnected)
    }

    fn validate_order(&self, asset: &str, amount: Decimal, duration: u32) -> Result<()> {
        let trading = &self.config.trading;
        if !is_known_asset(asset) {
            return Err(PocketOptionError::InvalidParameter(format!("unknown asset: {asset}")));
        }
        if amount < trading.min_order_amount || amount > trading.max_order_amount {
            return Err(PocketOptionError::InvalidParameter(format!(
                "amount {amount} outside [{}, {}]",
                trading.min_order_amount, trading.max_order_amount
            )));
        }
        if duration < trading.min_duration || duration > trading.max_duration {
            return Err(PocketOptionError::InvalidParameter(format!(
                "duration {duration}s outside [{}, {}]",
                trading.min_duration, trading.max_duration
            )));
        }
        Ok(())
    }

    fn is_stale(&self, balance: &Balance) -> bool {
        let max_age = ChronoDuration::from_std(self.config.trading.balance_max_age)
            .unwrap_or_else(|_| ChronoDuration::zero());
        Utc::now() - balance.last_updated > max_age
    }
}

fn websocket_probe(keep_alive: Weak<KeepAliveManager>) -> HealthProbe {
    Arc::new(move || {
        let keep_alive = keep_alive.clone();
        async move {
            let healthy = match keep_alive.upgrade() {
                Some(manager) => manager.is_connected().await,
                None => false,
            };
            Ok::<bool, PocketOptionError>(healthy)
        }
        .boxed()
    })
}

fn select_candles(mut candles: Vec<Candle>, count: usize, end_time: Option<DateTime<Utc>>) -> Vec<Candle> {
    if let Some(end) = end_time {
        candles.retain(|candle| candle.timestamp <= end);
    }
    let skip = candles.len().saturating_sub(count);
    candles.split_off(skip)
}
