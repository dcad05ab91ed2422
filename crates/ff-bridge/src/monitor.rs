//! Connection Monitor
//!
//! Owns the page instance's [`ConnectionState`]. One probe runs at start and
//! a `Ready` event is emitted whatever its outcome; afterwards a fixed-cadence
//! timer re-probes while the state is not `Connected`. A `Recovered` event is
//! emitted only on a `Disconnected -> Connected` edge.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::command::Command;
use crate::config::MonitorConfig;
use crate::relay::Relay;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Initial probe finished.
    Ready { connected: bool },
    /// Connectivity came back after being lost.
    Recovered,
}

#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    relay: Relay,
    config: MonitorConfig,
    state: watch::Sender<ConnectionState>,
    last_seen: Mutex<Option<Instant>>,
    events: broadcast::Sender<ConnectionEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    pub fn new(relay: Relay, config: MonitorConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Unknown);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                relay,
                config,
                state,
                last_seen: Mutex::new(None),
                events,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Last time the controller was seen alive.
    pub fn last_seen(&self) -> Option<Instant> {
        *lock(&self.inner.last_seen)
    }

    /// Subscribe before [`start`](Self::start) to observe the `Ready` event.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Ping the controller once and record the outcome. Never fails.
    pub async fn probe(&self) -> bool {
        let timeout = self.inner.relay.config().probe_timeout();
        match self.inner.relay.request(&Command::Ping, timeout).await {
            Ok(_) => {
                self.record_success();
                true
            }
            Err(err) => {
                debug!("Probe failed: {}", err);
                self.record_failure();
                false
            }
        }
    }

    /// Run the initial probe and the reconnection timer. Idempotent.
    pub fn start(&self) {
        let mut task = lock(&self.inner.task);
        if task.is_some() {
            return;
        }
        *task = Some(tokio::spawn(run(Arc::downgrade(&self.inner))));
    }

    /// Cancel the probe timer.
    pub fn shutdown(&self) {
        self.inner.stop();
    }

    pub(crate) fn record_success(&self) {
        self.inner.transition(ConnectionState::Connected);
    }

    pub(crate) fn record_failure(&self) {
        self.inner.transition(ConnectionState::Disconnected);
    }
}

impl MonitorInner {
    fn transition(&self, next: ConnectionState) {
        if next == ConnectionState::Connected {
            *lock(&self.last_seen) = Some(Instant::now());
        }

        let previous = self.state.send_replace(next);
        if previous == next {
            return;
        }
        info!("Connection state {:?} -> {:?}", previous, next);

        if previous == ConnectionState::Disconnected && next == ConnectionState::Connected {
            // No subscribers is fine.
            let _ = self.events.send(ConnectionEvent::Recovered);
        }
    }

    fn stop(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(monitor: Weak<MonitorInner>) {
    let period = {
        let Some(inner) = monitor.upgrade() else {
            return;
        };
        let handle = ConnectionMonitor { inner };
        let connected = handle.probe().await;
        if connected {
            info!("Controller bridge established");
        } else {
            info!("Controller not reachable yet, probing in the background");
        }
        let _ = handle.inner.events.send(ConnectionEvent::Ready { connected });
        handle.inner.config.probe_interval()
    };

    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = monitor.upgrade() else {
            break;
        };
        let handle = ConnectionMonitor { inner };
        if handle.is_connected() {
            continue;
        }
        debug!("Attempting to restore connection");
        if handle.probe().await {
            info!("Connection restored");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::envelope::Envelope;
    use crate::transport::{BroadcastTransport, Transport};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Pong responder that can be switched off.
    fn spawn_pong(transport: Arc<BroadcastTransport>, online: Arc<AtomicBool>) {
        let mut rx = transport.subscribe();
        tokio::spawn(async move {
            while let Ok(envelope) = rx.recv().await {
                if let Envelope::Request { id, .. } = envelope {
                    if online.load(Ordering::SeqCst) {
                        let _ = transport.post(Envelope::response(&id, json!({"pong": true})));
                    }
                }
            }
        });
    }

    fn monitor_over(transport: &Arc<BroadcastTransport>) -> ConnectionMonitor {
        let relay = Relay::new(transport.clone(), RelayConfig::default());
        ConnectionMonitor::new(relay, MonitorConfig::default())
    }

    fn drain(rx: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_emitted_once_when_connected() {
        let transport = Arc::new(BroadcastTransport::new());
        spawn_pong(transport.clone(), Arc::new(AtomicBool::new(true)));
        let monitor = monitor_over(&transport);
        let mut events = monitor.subscribe();

        monitor.start();
        monitor.start();
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert!(monitor.last_seen().is_some());
        assert_eq!(drain(&mut events), vec![ConnectionEvent::Ready { connected: true }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_emitted_when_disconnected() {
        let transport = Arc::new(BroadcastTransport::new());
        let monitor = monitor_over(&transport);
        let mut events = monitor.subscribe();

        monitor.start();
        time::sleep(Duration::from_secs(3)).await;

        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut events), vec![ConnectionEvent::Ready { connected: false }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_once_after_repeated_failures() {
        let transport = Arc::new(BroadcastTransport::new());
        let online = Arc::new(AtomicBool::new(false));
        spawn_pong(transport.clone(), online.clone());
        let monitor = monitor_over(&transport);
        let mut events = monitor.subscribe();

        // Probes at t=0, 17 and 32 all fail.
        monitor.start();
        time::sleep(Duration::from_secs(40)).await;
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut events), vec![ConnectionEvent::Ready { connected: false }]);

        // The probe at t=47 succeeds.
        online.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_secs(15)).await;
        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert_eq!(drain(&mut events), vec![ConnectionEvent::Recovered]);

        // Further ticks while connected neither probe nor emit.
        time::sleep(Duration::from_secs(60)).await;
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probing_when_connected_only_refreshes_timestamp() {
        let transport = Arc::new(BroadcastTransport::new());
        spawn_pong(transport.clone(), Arc::new(AtomicBool::new(true)));
        let monitor = monitor_over(&transport);
        let mut events = monitor.subscribe();

        assert!(monitor.probe().await);
        let first = monitor.last_seen().unwrap();
        time::sleep(Duration::from_secs(5)).await;
        assert!(monitor.probe().await);

        assert!(monitor.last_seen().unwrap() > first);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_probing() {
        let transport = Arc::new(BroadcastTransport::new());
        let online = Arc::new(AtomicBool::new(false));
        spawn_pong(transport.clone(), online.clone());
        let monitor = monitor_over(&transport);
        let mut events = monitor.subscribe();

        monitor.start();
        time::sleep(Duration::from_secs(3)).await;
        monitor.shutdown();

        online.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut events), vec![ConnectionEvent::Ready { connected: false }]);
    }
}
