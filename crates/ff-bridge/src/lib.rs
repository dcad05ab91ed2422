//! FocusFlow Bridge
//!
//! Reliable request/response messaging between a sandboxed page context and
//! the privileged controller, over a transport that may drop messages, have
//! no listener, or be torn down.
//!
//! # Architecture
//!
//! - `transport`: the best-effort, broadcast-style channel contract
//! - `envelope`: wire format of requests and responses
//! - `command`: typed payloads understood by the controller
//! - `relay`: correlation ids, deadlines and retries
//! - `monitor`: connection state and background reconnection
//! - `bridge`: page-facing facade over relay and monitor
//! - `controller`: the privileged side, runnable in-process

pub mod bridge;
pub mod command;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod monitor;
pub mod relay;
pub mod transport;

pub use bridge::Bridge;
pub use command::{Command, SyncData};
pub use config::{MonitorConfig, RelayConfig};
pub use controller::{Controller, ControllerMode, ControllerStatus};
pub use envelope::Envelope;
pub use error::{RelayError, TransportError};
pub use monitor::{ConnectionEvent, ConnectionMonitor, ConnectionState};
pub use relay::Relay;
pub use transport::{BroadcastTransport, Transport};
