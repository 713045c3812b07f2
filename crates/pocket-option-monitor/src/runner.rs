/*
[INPUT]:  MonitorConfig, shutdown token
[OUTPUT]: Connected client with periodic balance, stats, health and alert logging
[POS]:    Runtime layer - monitor loop
[UPDATE]: When changing what the monitor reports or how it stops
*/

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use pocket_option_adapter::{
    Alert, CallbackResult, ClientEvent, EventCallback, EventKind, PocketOptionClient, PocketOptionError,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MonitorConfig;

const SUMMARY_LOOKBACK: Duration = Duration::from_secs(3600);

const LIFECYCLE_EVENTS: [EventKind; 4] = [
    EventKind::Connected,
    EventKind::Disconnected,
    EventKind::Reconnected,
    EventKind::ReconnectsExhausted,
];

pub struct Monitor {
    client: PocketOptionClient,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let client = PocketOptionClient::new(&config.ssid, config.client_config())
            .context("build client")?;
        Ok(Self { client, config })
    }

    pub fn client(&self) -> &PocketOptionClient {
        &self.client
    }

    /// Connect, report until `shutdown` fires, then disconnect.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.install_callbacks(shutdown.clone()).await;

        let connected = self
            .client
            .connect(self.config.regions.as_deref())
            .await
            .context("connect")?;
        if !connected {
            bail!("no endpoint accepted the connection");
        }
        info!(demo = self.client.is_demo(), "monitor connected");

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.stats_interval_secs));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.report().await,
            }
        }

        self.client.disconnect().await;
        info!("monitor stopped");
        Ok(())
    }

    async fn install_callbacks(&self, shutdown: CancellationToken) {
        for kind in LIFECYCLE_EVENTS {
            let shutdown = shutdown.clone();
            let callback: EventCallback = Arc::new(move |event: &ClientEvent| -> CallbackResult {
                log_lifecycle(event);
                if matches!(event, ClientEvent::ReconnectsExhausted { .. }) {
                    shutdown.cancel();
                }
                Ok(())
            });
            self.client.add_event_callback(kind, callback).await;
        }

        self.client
            .resilience()
            .errors
            .add_alert_callback(Arc::new(|alert: &Alert| {
                error!(
                    error_type = %alert.error_type,
                    count = alert.count,
                    window_secs = alert.window_secs,
                    message = %alert.latest.message,
                    "error rate alert"
                );
            }))
            .await;
    }

    async fn report(&self) {
        match self.client.get_balance().await {
            Ok(balance) => info!(
                balance = %balance.balance,
                currency = %balance.currency,
                demo = balance.is_demo,
                "balance"
            ),
            Err(PocketOptionError::NotConnected) => warn!("balance skipped: not connected"),
            Err(err) => warn!(error = %err, "balance unavailable"),
        }

        let stats = self.client.get_connection_stats().await;
        info!(
            connected = stats.is_connected,
            region = stats.current_region.as_deref().unwrap_or("-"),
            uptime_secs = stats.uptime_secs.unwrap_or(0),
            sent = stats.messages_sent,
            received = stats.messages_received,
            reconnects = stats.total_reconnects,
            "connection stats"
        );

        let health = self.client.health_report().await;
        info!(overall = ?health.overall, services = health.services.len(), "health");

        let summary = self.client.resilience().errors.summary(SUMMARY_LOOKBACK).await;
        if summary.total_errors > 0 {
            warn!(
                total = summary.total_errors,
                rate_per_hour = summary.error_rate_per_hour,
                top = ?summary.top_errors.first(),
                "errors in the last hour"
            );
        }
    }
}

fn log_lifecycle(event: &ClientEvent) {
    match event {
        ClientEvent::Connected { url, region } => info!(%url, %region, "connected"),
        ClientEvent::Disconnected { reason } => warn!(%reason, "disconnected"),
        ClientEvent::Reconnected { attempt, url } => info!(attempt, %url, "reconnected"),
        ClientEvent::ReconnectsExhausted { attempts } => {
            error!(attempts, "reconnects exhausted; shutting down")
        }
        _ => {}
    }
}
