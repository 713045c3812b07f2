/*
[INPUT]:  Static broker endpoint table, user-supplied region names or URLs
[OUTPUT]: Ordered candidate endpoints for the keep-alive connect cycle
[POS]:    WebSocket layer - endpoint catalog
[UPDATE]: When the broker adds, retires or renames endpoints
*/

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A named transport URL candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    pub demo: bool,
}

impl Endpoint {
    pub fn from_url(url: &str) -> Self {
        Self {
            name: region_from_url(url),
            url: url.to_string(),
            demo: url.contains("demo"),
        }
    }
}

const REGIONS: &[(&str, &str)] = &[
    ("EUROPA", "wss://api-eu.po.market/socket.io/?EIO=4&transport=websocket"),
    ("SEYCHELLES", "wss://api-sc.po.market/socket.io/?EIO=4&transport=websocket"),
    ("HONGKONG", "wss://api-hk.po.market/socket.io/?EIO=4&transport=websocket"),
    ("SERVER1", "wss://api-spb.po.market/socket.io/?EIO=4&transport=websocket"),
    ("FRANCE2", "wss://api-fr2.po.market/socket.io/?EIO=4&transport=websocket"),
    ("UNITED_STATES4", "wss://api-us4.po.market/socket.io/?EIO=4&transport=websocket"),
    ("UNITED_STATES3", "wss://api-us3.po.market/socket.io/?EIO=4&transport=websocket"),
    ("UNITED_STATES2", "wss://api-us2.po.market/socket.io/?EIO=4&transport=websocket"),
    ("DEMO", "wss://demo-api-eu.po.market/socket.io/?EIO=4&transport=websocket"),
    ("DEMO_2", "wss://try-demo-eu.po.market/socket.io/?EIO=4&transport=websocket"),
    ("UNITED_STATES", "wss://api-us-north.po.market/socket.io/?EIO=4&transport=websocket"),
    ("RUSSIA", "wss://api-msk.po.market/socket.io/?EIO=4&transport=websocket"),
    ("SERVER2", "wss://api-l.po.market/socket.io/?EIO=4&transport=websocket"),
    ("INDIA", "wss://api-in.po.market/socket.io/?EIO=4&transport=websocket"),
    ("FRANCE", "wss://api-fr.po.market/socket.io/?EIO=4&transport=websocket"),
    ("FINLAND", "wss://api-fin.po.market/socket.io/?EIO=4&transport=websocket"),
    ("SERVER3", "wss://api-c.po.market/socket.io/?EIO=4&transport=websocket"),
    ("ASIA", "wss://api-asia.po.market/socket.io/?EIO=4&transport=websocket"),
    ("SERVER4", "wss://api-us-south.po.market/socket.io/?EIO=4&transport=websocket"),
];

fn catalog_entry(name: &str, url: &str) -> Endpoint {
    Endpoint {
        name: name.to_string(),
        url: url.to_string(),
        demo: name.contains("DEMO"),
    }
}

pub fn all_endpoints() -> Vec<Endpoint> {
    REGIONS
        .iter()
        .map(|(name, url)| catalog_entry(name, url))
        .collect()
}

pub fn demo_endpoints() -> Vec<Endpoint> {
    all_endpoints().into_iter().filter(|e| e.demo).collect()
}

pub fn live_endpoints() -> Vec<Endpoint> {
    all_endpoints().into_iter().filter(|e| !e.demo).collect()
}

/// Case-insensitive catalog lookup.
pub fn region(name: &str) -> Option<Endpoint> {
    REGIONS
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(name, url)| catalog_entry(name, url))
}

/// Candidate list for a connect cycle. Entries may be catalog names or
/// `ws://`/`wss://` URLs; unknown names are skipped. With no request the
/// catalog is filtered by account mode.
pub fn resolve_candidates(requested: Option<&[String]>, is_demo: bool) -> Vec<Endpoint> {
    match requested {
        Some(entries) => entries
            .iter()
            .filter_map(|entry| {
                if entry.starts_with("ws://") || entry.starts_with("wss://") {
                    return Some(Endpoint::from_url(entry));
                }
                let found = region(entry);
                if found.is_none() {
                    warn!(region = %entry, "unknown region requested; skipping");
                }
                found
            })
            .collect(),
        None if is_demo => demo_endpoints(),
        None => live_endpoints(),
    }
}

/// Short region label from an endpoint URL: `api-eu` -> `EU`, any demo host -> `DEMO`.
pub fn region_from_url(url: &str) -> String {
    let host = url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_default();

    if host.contains("demo") {
        return "DEMO".to_string();
    }

    let label = host.split('.').next().unwrap_or_default();
    match label.strip_prefix("api-") {
        Some(region) if !region.is_empty() => region.to_ascii_uppercase(),
        _ if label.is_empty() => "UNKNOWN".to_string(),
        _ => label.to_ascii_uppercase(),
    }
}
