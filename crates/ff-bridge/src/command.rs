//! Typed payloads exchanged between page and controller.
//!
//! The wire tag is the `type` field of the request payload.

use serde::{Deserialize, Serialize};

/// Every payload `type` the controller understands.
pub const KNOWN_TYPES: &[&str] = &[
    "PING",
    "HEALTH_CHECK",
    "LOG_DISTRACTION",
    "RETURN_TO_FOCUS",
    "START_BREAK",
    "START_BLOCKING",
    "STOP_BLOCKING",
    "SYNC_SETTINGS",
    "GET_STATUS",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Health probe. Any reply without an error counts as alive.
    Ping,
    HealthCheck,
    /// A navigation to `site` was blocked by `rule`.
    LogDistraction { site: String, rule: String },
    /// The user left a blocked page to go back to work.
    ReturnToFocus { site: String },
    /// Pause blocking for `duration` minutes.
    StartBreak { duration: u32 },
    #[serde(rename_all = "camelCase")]
    StartBlocking {
        blocked_sites: Vec<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    StopBlocking,
    SyncSettings { data: SyncData },
    GetStatus,
}

/// Settings pushed by `SYNC_SETTINGS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    pub active: bool,
    #[serde(default)]
    pub blocked_sites: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Command {
    /// Wire name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::HealthCheck => "HEALTH_CHECK",
            Self::LogDistraction { .. } => "LOG_DISTRACTION",
            Self::ReturnToFocus { .. } => "RETURN_TO_FOCUS",
            Self::StartBreak { .. } => "START_BREAK",
            Self::StartBlocking { .. } => "START_BLOCKING",
            Self::StopBlocking => "STOP_BLOCKING",
            Self::SyncSettings { .. } => "SYNC_SETTINGS",
            Self::GetStatus => "GET_STATUS",
        }
    }

    pub fn is_probe(&self) -> bool {
        matches!(self, Self::Ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_value(Command::Ping).unwrap(), json!({"type": "PING"}));
        assert_eq!(
            serde_json::to_value(Command::StartBlocking {
                blocked_sites: vec!["youtube.com".into()],
                session_id: Some("s1".into()),
            })
            .unwrap(),
            json!({"type": "START_BLOCKING", "blockedSites": ["youtube.com"], "sessionId": "s1"})
        );
    }

    #[test]
    fn test_kind_matches_known_types() {
        let commands = [
            Command::Ping,
            Command::HealthCheck,
            Command::LogDistraction { site: "a".into(), rule: "a".into() },
            Command::ReturnToFocus { site: "a".into() },
            Command::StartBreak { duration: 5 },
            Command::StartBlocking { blocked_sites: vec![], session_id: None },
            Command::StopBlocking,
            Command::SyncSettings {
                data: SyncData { active: true, blocked_sites: vec![], session_id: None },
            },
            Command::GetStatus,
        ];
        for command in &commands {
            let wire = serde_json::to_value(command).unwrap();
            assert_eq!(wire["type"], command.kind());
            assert!(KNOWN_TYPES.contains(&command.kind()));
        }
    }

    #[test]
    fn test_extra_fields_ignored() {
        let parsed: Command =
            serde_json::from_value(json!({"type": "PING", "timestamp": 1, "retryCount": 0})).unwrap();
        assert_eq!(parsed, Command::Ping);
    }
}
