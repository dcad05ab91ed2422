//! Page-facing facade over the relay and the connection monitor.

use std::future::Future;
use std::sync::Arc;

use log::debug;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::command::Command;
use crate::config::{MonitorConfig, RelayConfig};
use crate::error::RelayError;
use crate::monitor::{ConnectionEvent, ConnectionMonitor, ConnectionState};
use crate::relay::Relay;
use crate::transport::Transport;

#[derive(Clone)]
pub struct Bridge {
    relay: Relay,
    monitor: ConnectionMonitor,
}

impl Bridge {
    /// Build the bridge without probing yet; call [`start`](Self::start)
    /// once event subscribers are attached.
    pub fn new(
        transport: Arc<dyn Transport>,
        relay_config: RelayConfig,
        monitor_config: MonitorConfig,
    ) -> Self {
        let relay = Relay::new(transport, relay_config);
        let monitor = ConnectionMonitor::new(relay.clone(), monitor_config);
        Self { relay, monitor }
    }

    pub fn start(&self) {
        self.monitor.start();
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.monitor.subscribe()
    }

    /// Send a business message.
    ///
    /// A known-down connection is probed first; the probe only refreshes the
    /// connection state and never fails the send.
    pub async fn send(&self, command: Command) -> Result<Value, RelayError> {
        if self.monitor.state() == ConnectionState::Disconnected {
            debug!("Connection down, probing before {}", command.kind());
            self.monitor.probe().await;
        }

        let result = self.relay.send(command).await;
        self.record(&result);
        result
    }

    /// Post `command` now without a pre-probe and return the remainder of
    /// the exchange as a detached future. The outcome still feeds the
    /// connection state.
    pub fn dispatch(
        &self,
        command: Command,
    ) -> impl Future<Output = Result<Value, RelayError>> + Send + 'static {
        let exchange = self.relay.dispatch(command);
        let bridge = self.clone();
        async move {
            let result = exchange.await;
            bridge.record(&result);
            result
        }
    }

    /// Ping through the retrying path. Never fails.
    pub async fn health_check(&self) -> bool {
        match self.send(Command::Ping).await {
            Ok(reply) => {
                reply.get("pong") == Some(&Value::Bool(true))
                    || reply.get("status").and_then(Value::as_str) == Some("connected")
            }
            Err(err) => {
                debug!("Health check failed: {}", err);
                false
            }
        }
    }

    /// Manual reconnection attempt.
    pub async fn reconnect(&self) -> bool {
        debug!("Manual reconnect attempt");
        self.monitor.probe().await
    }

    /// Any reply, even an explicit error, proves the controller is alive.
    fn record(&self, result: &Result<Value, RelayError>) {
        match result {
            Err(err) if err.is_transient() => self.monitor.record_failure(),
            Ok(_) | Err(RelayError::Remote(_)) => self.monitor.record_success(),
            Err(_) => {}
        }
    }

    /// Stop probing and detach from the transport.
    pub fn shutdown(&self) {
        self.monitor.shutdown();
        self.relay.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::transport::BroadcastTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time;

    struct Responder {
        online: Arc<AtomicBool>,
        pings: Arc<AtomicUsize>,
    }

    fn spawn_responder(transport: Arc<BroadcastTransport>, online: bool) -> Responder {
        let responder = Responder {
            online: Arc::new(AtomicBool::new(online)),
            pings: Arc::new(AtomicUsize::new(0)),
        };
        let flag = responder.online.clone();
        let pings = responder.pings.clone();
        let mut rx = transport.subscribe();
        tokio::spawn(async move {
            while let Ok(envelope) = rx.recv().await {
                let Envelope::Request { id, payload } = envelope else {
                    continue;
                };
                if payload["type"] == "PING" {
                    pings.fetch_add(1, Ordering::SeqCst);
                }
                if flag.load(Ordering::SeqCst) {
                    let _ = transport.post(Envelope::response(&id, json!({"pong": true, "status": "connected"})));
                }
            }
        });
        responder
    }

    fn bridge_over(transport: &Arc<BroadcastTransport>) -> Bridge {
        Bridge::new(transport.clone(), RelayConfig::default(), MonitorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_success_marks_connected() {
        let transport = Arc::new(BroadcastTransport::new());
        let _responder = spawn_responder(transport.clone(), true);
        let bridge = bridge_over(&transport);

        assert_eq!(bridge.monitor().state(), ConnectionState::Unknown);
        bridge.send(Command::GetStatus).await.unwrap();
        assert!(bridge.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_marks_disconnected() {
        let transport = Arc::new(BroadcastTransport::new());
        let bridge = bridge_over(&transport);

        let err = bridge.send(Command::GetStatus).await.unwrap_err();
        assert_eq!(err, RelayError::Timeout { attempts: 3 });
        assert_eq!(bridge.monitor().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_send_probes_first() {
        let transport = Arc::new(BroadcastTransport::new());
        let responder = spawn_responder(transport.clone(), false);
        let bridge = bridge_over(&transport);
        let mut events = bridge.events();

        assert!(!bridge.reconnect().await);
        assert_eq!(bridge.monitor().state(), ConnectionState::Disconnected);

        responder.online.store(true, Ordering::SeqCst);
        let pings_before = responder.pings.load(Ordering::SeqCst);
        bridge.send(Command::GetStatus).await.unwrap();

        assert_eq!(responder.pings.load(Ordering::SeqCst), pings_before + 1);
        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Recovered);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_never_fails() {
        let transport = Arc::new(BroadcastTransport::new());
        let responder = spawn_responder(transport.clone(), false);
        let bridge = bridge_over(&transport);

        assert!(!bridge.health_check().await);
        responder.online.store(true, Ordering::SeqCst);
        assert!(bridge.health_check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_detaches() {
        let transport = Arc::new(BroadcastTransport::new());
        let bridge = bridge_over(&transport);
        bridge.start();
        time::sleep(Duration::from_secs(3)).await;

        bridge.shutdown();
        tokio::task::yield_now().await;
        assert_eq!(transport.listener_count(), 0);
        assert!(bridge.send(Command::Ping).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_remote_error_counts_as_alive() {
        let transport = Arc::new(BroadcastTransport::new());
        let bridge = bridge_over(&transport);
        assert!(!bridge.reconnect().await);
        let mut events = bridge.events();

        let mut rx = transport.subscribe();
        let replies = transport.clone();
        tokio::spawn(async move {
            while let Ok(envelope) = rx.recv().await {
                if let Envelope::Request { id, .. } = envelope {
                    let body = json!({"success": false, "error": "Unknown message type"});
                    let _ = replies.post(Envelope::error(&id, "Unknown message type", Some(body)));
                }
            }
        });

        let err = bridge.send(Command::GetStatus).await.unwrap_err();
        assert_eq!(err, RelayError::Remote("Unknown message type".into()));
        assert!(bridge.is_connected());
        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_outcome_updates_connection() {
        let transport = Arc::new(BroadcastTransport::new());
        let _responder = spawn_responder(transport.clone(), true);
        let bridge = bridge_over(&transport);

        let reply = tokio::spawn(bridge.dispatch(Command::GetStatus)).await.unwrap();
        assert_eq!(reply.unwrap()["pong"], true);
        assert!(bridge.is_connected());
    }
}
