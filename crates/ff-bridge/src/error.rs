//! Error taxonomy surfaced by the bridge.

/// Message fragments that mark a remote error as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "receiving end does not exist",
    "message port closed",
    "extension context invalidated",
];

/// Failure of the underlying post operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("No receiver attached to transport")]
    NoReceiver,
    #[error("Failed to encode envelope: {0}")]
    Encode(String),
}

/// Error returned to callers of the relay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("No response after {attempts} attempt(s); controller may be temporarily unavailable")]
    Timeout { attempts: u32 },
    #[error("Failed to send message: {0}")]
    Transport(#[from] TransportError),
    #[error("Remote error: {0}")]
    Remote(String),
}

impl RelayError {
    /// Whether retrying may help: bare timeouts and remote errors that
    /// indicate a missing or torn-down receiver.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Remote(message) => is_transient_message(message),
            Self::Transport(_) => false,
        }
    }
}

/// Classify a remote error string.
pub fn is_transient_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker))
}
