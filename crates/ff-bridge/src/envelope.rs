//! Transport-level envelopes.
//!
//! Requests carry a JSON object payload stamped with `timestamp` and
//! `retryCount`; responses carry the same correlation id back.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;
use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "BRIDGE_REQUEST")]
    Request { id: String, payload: Value },
    #[serde(rename = "BRIDGE_RESPONSE")]
    Response {
        id: String,
        payload: Option<Value>,
        error: Option<String>,
    },
}

impl Envelope {
    /// Build a request envelope for `command`.
    pub fn request(id: &str, command: &Command, retry_count: u32) -> Result<Self, TransportError> {
        let mut payload = match serde_json::to_value(command) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(TransportError::Encode(format!(
                    "payload must be an object, got {other}"
                )))
            }
            Err(e) => return Err(TransportError::Encode(e.to_string())),
        };
        payload.insert("timestamp".into(), Value::from(now_ms()));
        payload.insert("retryCount".into(), Value::from(retry_count));

        Ok(Self::Request {
            id: id.to_string(),
            payload: Value::Object(payload),
        })
    }

    pub fn response(id: &str, payload: Value) -> Self {
        Self::Response {
            id: id.to_string(),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: &str, error: &str, payload: Option<Value>) -> Self {
        Self::Response {
            id: id.to_string(),
            payload,
            error: Some(error.to_string()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => id,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
