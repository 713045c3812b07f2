/*
[INPUT]:  YAML configuration file, SSID environment fallback
[OUTPUT]: Parsed and validated monitor configuration
[POS]:    Configuration layer - monitor setup
[UPDATE]: When adding new configuration options
*/

use anyhow::{Context, bail};
use pocket_option_adapter::ClientConfig;
use pocket_option_adapter::types::ConnectionMode;
use serde::{Deserialize, Serialize};

pub const SSID_ENV: &str = "POCKET_OPTION_SSID";

/// Top-level configuration for the monitor binary
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Bare session id or a captured `42["auth",...]` frame. Falls back to
    /// `POCKET_OPTION_SSID` when empty.
    #[serde(default)]
    pub ssid: String,
    #[serde(default = "default_demo")]
    pub demo: bool,
    /// Region names or literal socket URLs, tried in order
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    /// Persistent mode adds the health task and fast reconnects
    #[serde(default)]
    pub persistent: bool,
    /// Seconds between status snapshots
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_demo() -> bool {
    true
}

fn default_stats_interval_secs() -> u64 {
    30
}

impl MonitorConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_yaml::from_str(content).context("parse monitor config")?;
        if config.ssid.trim().is_empty() {
            config.ssid = std::env::var(SSID_ENV).unwrap_or_default();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ssid.trim().is_empty() {
            bail!("ssid is empty; set it in the config file or {SSID_ENV}");
        }
        if self.stats_interval_secs == 0 {
            bail!("stats_interval_secs must be positive");
        }
        if let Some(regions) = &self.regions {
            if regions.is_empty() {
                bail!("regions list is empty; omit it to use the default catalog");
            }
        }
        let trading = &self.client.trading;
        if trading.min_order_amount > trading.max_order_amount {
            bail!(
                "min_order_amount {} exceeds max_order_amount {}",
                trading.min_order_amount,
                trading.max_order_amount
            );
        }
        Ok(())
    }

    /// Client settings with the top-level flags and environment overrides applied.
    pub fn client_config(&self) -> ClientConfig {
        let mut client = self.client.clone().with_env_overrides();
        client.is_demo = self.demo;
        client.mode = if self.persistent {
            ConnectionMode::Persistent
        } else {
            ConnectionMode::Simple
        };
        client
    }
}
