/*
[INPUT]:  Raw SSID string (bare session id or a captured `42["auth",{...}]` frame)
[OUTPUT]: SessionCredentials and the auth frame sent after the handshake
[POS]:    Auth layer - credential parsing and rendering
[UPDATE]: When the auth frame gains or loses fields
*/

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{PocketOptionError, Result};
use crate::types::models::value_helpers;

const AUTH_FRAME_PREFIX: &str = r#"42["auth","#;

/// Credentials identifying a broker account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub session: String,
    pub is_demo: bool,
    pub uid: u64,
    pub platform: u32,
    pub is_fast_history: bool,
}

impl SessionCredentials {
    /// Parse an SSID. A full auth frame contributes its session, uid and
    /// platform; `is_demo` always comes from the caller.
    pub fn parse(ssid: &str, is_demo: bool, uid: u64, platform: u32) -> Result<Self> {
        let ssid = ssid.trim();
        if ssid.is_empty() {
            return Err(PocketOptionError::Config("ssid is empty".to_string()));
        }

        let mut credentials = Self {
            session: ssid.to_string(),
            is_demo,
            uid,
            platform,
            is_fast_history: true,
        };

        if ssid.starts_with(AUTH_FRAME_PREFIX) {
            let payload = parse_auth_frame(ssid)?;
            let session = value_helpers::string_field(&payload, "session").ok_or_else(|| {
                PocketOptionError::Config("auth frame has no session field".to_string())
            })?;
            credentials.session = session;
            if let Some(uid) = payload.get("uid").and_then(as_u64) {
                credentials.uid = uid;
            }
            if let Some(platform) = payload.get("platform").and_then(as_u64) {
                credentials.platform = platform as u32;
            }
            if let Some(fast) = value_helpers::flag_field(&payload, "isFastHistory") {
                credentials.is_fast_history = fast;
            }
            debug!(uid = credentials.uid, platform = credentials.platform, "parsed complete ssid frame");
        }

        Ok(credentials)
    }

    /// Frame sent verbatim as the last handshake step.
    pub fn auth_frame(&self) -> String {
        let payload = json!({
            "session": self.session,
            "isDemo": if self.is_demo { 1 } else { 0 },
            "uid": self.uid,
            "platform": self.platform,
            "isFastHistory": self.is_fast_history,
        });
        format!(r#"42["auth",{payload}]"#)
    }
}

fn parse_auth_frame(ssid: &str) -> Result<Value> {
    let body: Value = serde_json::from_str(&ssid[2..])?;
    match body {
        Value::Array(mut items) if items.len() >= 2 => Ok(items.swap_remove(1)),
        _ => Err(PocketOptionError::Config(
            "auth frame must be [\"auth\", {...}]".to_string(),
        )),
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_session() {
        let creds = SessionCredentials::parse("abc123", true, 42, 1).unwrap();
        assert_eq!(creds.session, "abc123");
        assert_eq!(creds.uid, 42);
        assert!(creds.is_demo);
    }

    #[test]
    fn test_parse_complete_frame() {
        let ssid = r#"42["auth",{"session":"s3ss","isDemo":1,"uid":72645361,"platform":2,"isFastHistory":true}]"#;
        let creds = SessionCredentials::parse(ssid, false, 0, 1).unwrap();
        assert_eq!(creds.session, "s3ss");
        assert_eq!(creds.uid, 72645361);
        assert_eq!(creds.platform, 2);
        assert!(!creds.is_demo);
    }

    #[test]
    fn test_parse_rejects_empty_and_malformed() {
        assert!(SessionCredentials::parse("  ", true, 0, 1).is_err());
        assert!(SessionCredentials::parse(r#"42["auth",{"uid":1}]"#, true, 0, 1).is_err());
        assert!(SessionCredentials::parse(r#"42["auth",{"#, true, 0, 1).is_err());
    }

    #[test]
    fn test_auth_frame_format() {
        let creds = SessionCredentials::parse("abc", true, 7, 1).unwrap();
        let frame = creds.auth_frame();
        assert!(frame.starts_with(AUTH_FRAME_PREFIX));

        let body: Value = serde_json::from_str(&frame[2..]).unwrap();
        assert_eq!(body[0], "auth");
        assert_eq!(body[1]["session"], "abc");
        assert_eq!(body[1]["isDemo"], 1);
        assert_eq!(body[1]["uid"], 7);
        assert_eq!(body[1]["isFastHistory"], true);
    }
}
