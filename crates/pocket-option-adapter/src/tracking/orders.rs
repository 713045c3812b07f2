/*
[INPUT]:  Order-opened and settlement push payloads; locally synthesized placeholders
[OUTPUT]: Active/completed order sets with server-id aliasing
[POS]:    Tracking layer - order lifecycle
[UPDATE]: When order push schemas or settlement rules change
*/

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::types::models::value_helpers::{decimal_field, string_field, timestamp};
use crate::types::{OrderDirection, OrderResult, OrderStatus};

const DEFAULT_DURATION_SECS: u32 = 60;

/// Outcome of feeding an opened-order push to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Inserted(OrderResult),
    /// A provisional placeholder was replaced by the confirmed order.
    Confirmed(OrderResult),
    /// Already tracked in either set.
    Duplicate,
    /// Payload lacked a request id.
    Ignored,
}

/// Orders keyed by client request id. An id lives in exactly one of the two sets.
#[derive(Debug, Default)]
pub struct OrderTracker {
    active: HashMap<String, OrderResult>,
    completed: HashMap<String, OrderResult>,
    server_ids: HashMap<String, String>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Look up by request id or server id, active set first.
    pub fn get(&self, id: &str) -> Option<&OrderResult> {
        let key = self.resolve_key(id);
        self.active.get(key).or_else(|| self.completed.get(key))
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.contains_key(self.resolve_key(id))
    }

    pub fn active_orders(&self) -> Vec<OrderResult> {
        let mut orders: Vec<OrderResult> = self.active.values().cloned().collect();
        orders.sort_by(|a, b| a.placed_at.cmp(&b.placed_at));
        orders
    }

    /// Track a locally synthesized result unless the id is already known.
    pub fn insert_provisional(&mut self, order: OrderResult) -> bool {
        if self.active.contains_key(&order.order_id) || self.completed.contains_key(&order.order_id) {
            return false;
        }
        debug!(order_id = %order.order_id, "tracking provisional order");
        self.active.insert(order.order_id.clone(), order);
        true
    }

    pub fn track_opened(&mut self, payload: &Value) -> OpenOutcome {
        let Some(request_id) = string_field(payload, "requestId") else {
            return OpenOutcome::Ignored;
        };

        if let Some(server_id) = string_field(payload, "id") {
            if server_id != request_id {
                self.server_ids.insert(server_id, request_id.clone());
            }
        }

        if self.completed.contains_key(&request_id) {
            return OpenOutcome::Duplicate;
        }

        match self.active.get(&request_id) {
            Some(existing) if existing.provisional => {
                let confirmed = order_from_payload(&request_id, payload, Some(existing));
                self.active.insert(request_id, confirmed.clone());
                OpenOutcome::Confirmed(confirmed)
            }
            Some(_) => OpenOutcome::Duplicate,
            None => {
                let order = order_from_payload(&request_id, payload, None);
                self.active.insert(request_id, order.clone());
                OpenOutcome::Inserted(order)
            }
        }
    }

    /// Apply a settlement push. Returns the orders moved to the completed set.
    pub fn settle(&mut self, payload: &Value) -> Vec<OrderResult> {
        let deals = match payload {
            Value::Array(deals) => deals.as_slice(),
            other => match other.get("deals").and_then(Value::as_array) {
                Some(deals) => deals.as_slice(),
                None => return Vec::new(),
            },
        };

        let mut settled = Vec::new();
        for deal in deals {
            let Some(id) = string_field(deal, "id") else {
                continue;
            };
            let key = self.resolve_key(&id).to_string();
            let Some(mut order) = self.active.remove(&key) else {
                debug!(order_id = %id, "settlement for untracked order ignored");
                continue;
            };

            let profit = decimal_field(deal, "profit").unwrap_or(Decimal::ZERO);
            order.status = if profit > Decimal::ZERO {
                OrderStatus::Win
            } else {
                OrderStatus::Lose
            };
            order.profit = Some(profit);
            order.provisional = false;
            order.error_message = None;
            if let Some(payout) = decimal_field(deal, "payout") {
                order.payout = Some(payout);
            }

            self.completed.insert(key, order.clone());
            settled.push(order);
        }
        settled
    }

    fn resolve_key<'a>(&'a self, id: &'a str) -> &'a str {
        if self.active.contains_key(id) || self.completed.contains_key(id) {
            return id;
        }
        self.server_ids.get(id).map(String::as_str).unwrap_or(id)
    }
}

fn order_from_payload(request_id: &str, payload: &Value, fallback: Option<&OrderResult>) -> OrderResult {
    let now = Utc::now();

    let direction = payload
        .get("action")
        .and_then(Value::as_str)
        .and_then(|action| action.parse::<OrderDirection>().ok())
        .or_else(|| payload.get("command").and_then(Value::as_i64).map(OrderDirection::from_command))
        .or(fallback.map(|order| order.direction))
        .unwrap_or(OrderDirection::Call);

    let duration = payload
        .get("time")
        .and_then(Value::as_u64)
        .map(|secs| secs as u32)
        .or(fallback.map(|order| order.duration))
        .unwrap_or(DEFAULT_DURATION_SECS);

    let placed_at: DateTime<Utc> = payload
        .get("openTimestamp")
        .and_then(timestamp)
        .or(fallback.map(|order| order.placed_at))
        .unwrap_or(now);
    let expires_at = payload
        .get("closeTimestamp")
        .and_then(timestamp)
        .unwrap_or_else(|| placed_at + ChronoDuration::seconds(i64::from(duration)));

    OrderResult {
        order_id: request_id.to_string(),
        asset: string_field(payload, "asset")
            .or(fallback.map(|order| order.asset.clone()))
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        amount: decimal_field(payload, "amount")
            .or(fallback.map(|order| order.amount))
            .unwrap_or(Decimal::ZERO),
        direction,
        duration,
        status: OrderStatus::Active,
        placed_at,
        expires_at,
        profit: decimal_field(payload, "profit"),
        payout: decimal_field(payload, "percentProfit").or_else(|| decimal_field(payload, "payout")),
        provisional: false,
        error_message: None,
    }
}
