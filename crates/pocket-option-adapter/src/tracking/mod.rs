/*
[INPUT]:  Dispatcher events (balance, order, candle pushes)
[OUTPUT]: Latest balance, tracked orders, resolved candle requests
[POS]:    Tracking layer - request correlator
[UPDATE]: When new request/response pairs need correlation
*/

pub mod candles;
pub mod orders;
pub mod pending;

pub use candles::{CandleKey, parse_candles};
pub use orders::{OpenOutcome, OrderTracker};
pub use pending::{PendingRequests, Registration};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::types::models::value_helpers::{decimal_field, flag_field, string_field};
use crate::types::{Balance, Candle, OrderResult};
use crate::ws::dispatcher::{CallbackResult, EventSubscriber};
use crate::ws::message::{ClientEvent, EventKind};

/// Routes push events into the state that pending client calls wait on.
pub struct Correlator {
    is_demo: bool,
    balance: watch::Sender<Option<Balance>>,
    orders: Mutex<OrderTracker>,
    candles: PendingRequests<CandleKey, Vec<Candle>>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("is_demo", &self.is_demo)
            .finish_non_exhaustive()
    }
}

impl Correlator {
    /// Event kinds the correlator must be subscribed to.
    pub const SUBSCRIBED_KINDS: [EventKind; 6] = [
        EventKind::BalanceUpdated,
        EventKind::OrderOpened,
        EventKind::OrderClosed,
        EventKind::CandlesReceived,
        EventKind::StreamUpdate,
        EventKind::HistoryUpdate,
    ];

    pub fn new(is_demo: bool) -> Self {
        let (balance, _) = watch::channel(None);
        Self {
            is_demo,
            balance,
            orders: Mutex::new(OrderTracker::new()),
            candles: PendingRequests::new(),
        }
    }

    pub fn balance(&self) -> Option<Balance> {
        self.balance.borrow().clone()
    }

    pub fn subscribe_balance(&self) -> watch::Receiver<Option<Balance>> {
        self.balance.subscribe()
    }

    pub fn candle_requests(&self) -> &PendingRequests<CandleKey, Vec<Candle>> {
        &self.candles
    }

    pub async fn order(&self, id: &str) -> Option<OrderResult> {
        self.orders.lock().await.get(id).cloned()
    }

    pub async fn active_orders(&self) -> Vec<OrderResult> {
        self.orders.lock().await.active_orders()
    }

    pub async fn insert_provisional(&self, order: OrderResult) -> bool {
        self.orders.lock().await.insert_provisional(order)
    }

    fn on_balance(&self, data: &Value) {
        let Some(balance) = decimal_field(data, "balance") else {
            debug!("balance push without numeric balance ignored");
            return;
        };
        let update = Balance {
            balance,
            currency: string_field(data, "currency").unwrap_or_else(|| "USD".to_string()),
            is_demo: flag_field(data, "isDemo").unwrap_or(self.is_demo),
            last_updated: Utc::now(),
        };
        info!(balance = %update.balance, currency = %update.currency, "balance updated");
        self.balance.send_replace(Some(update));
    }

    async fn on_order_opened(&self, data: &Value) {
        match self.orders.lock().await.track_opened(data) {
            OpenOutcome::Inserted(order) => {
                info!(order_id = %order.order_id, asset = %order.asset, "order opened");
            }
            OpenOutcome::Confirmed(order) => {
                info!(order_id = %order.order_id, "provisional order confirmed by server");
            }
            OpenOutcome::Duplicate | OpenOutcome::Ignored => {}
        }
    }

    async fn on_order_closed(&self, data: &Value) {
        let settled = self.orders.lock().await.settle(data);
        for order in settled {
            info!(
                order_id = %order.order_id,
                status = ?order.status,
                profit = ?order.profit,
                "order settled"
            );
        }
    }

    /// Complete the candle request named by the payload, or the only
    /// outstanding one when the payload names none.
    async fn on_candles(&self, data: &Value, require_rows: bool) {
        if require_rows && data.get("candles").is_none() && data.get("data").is_none() {
            return;
        }

        let key = match CandleKey::from_payload(data) {
            Some(key) => key,
            None => {
                let pending = self.candles.pending_keys().await;
                match pending.as_slice() {
                    [only] => only.clone(),
                    _ => return,
                }
            }
        };

        let candles = parse_candles(data, &key.asset, key.period);
        let count = candles.len();
        if self.candles.resolve(&key, candles).await {
            debug!(key = %key, count, "candle request resolved");
        }
    }
}

#[async_trait]
impl EventSubscriber for Correlator {
    async fn on_event(&self, event: &ClientEvent) -> CallbackResult {
        match event {
            ClientEvent::BalanceUpdated(data) => self.on_balance(data),
            ClientEvent::OrderOpened(data) => self.on_order_opened(data).await,
            ClientEvent::OrderClosed(data) => self.on_order_closed(data).await,
            ClientEvent::CandlesReceived(data) | ClientEvent::HistoryUpdate(data) => {
                self.on_candles(data, false).await
            }
            ClientEvent::StreamUpdate(data) => self.on_candles(data, true).await,
            _ => {}
        }
        Ok(())
    }
}
