//! Reference controller: the privileged side of the bridge.
//!
//! Holds the authoritative blocking configuration, answers page requests over
//! a [`Transport`] and publishes configuration changes to every subscribed
//! page. Requests are handled one at a time, in arrival order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use ff_core::{BlockRule, BlockingConfig, ConfigUpdate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::command::{Command, KNOWN_TYPES};
use crate::envelope::{now_ms, Envelope};
use crate::transport::Transport;

pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";

/// Error replied while the controller pretends its receiver is gone.
pub const RECEIVER_UNAVAILABLE: &str =
    "Could not establish connection. Receiving end does not exist.";

const DISTRACTION_LOG_LIMIT: usize = 100;
const UPDATE_CAPACITY: usize = 64;

/// How the controller reacts to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    #[default]
    Online,
    /// Drop every request, as if nobody were listening.
    Silent,
    /// Reply with a transient "receiving end does not exist" error.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistractionEntry {
    pub site: String,
    pub rule: String,
    pub timestamp: u64,
    pub session_id: Option<String>,
}

/// Reply body of `GET_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub is_active: bool,
    pub blocked_sites: Vec<BlockRule>,
    pub session_id: Option<String>,
    pub distraction_count: usize,
    pub focus_returns: u64,
    pub on_break: bool,
}

#[derive(Debug, Default)]
struct ControllerState {
    config: BlockingConfig,
    session_active: bool,
    session_id: Option<String>,
    on_break: bool,
    /// Bumped whenever a pending break timer must no longer fire.
    break_generation: u64,
    break_timer: Option<JoinHandle<()>>,
    distractions: VecDeque<DistractionEntry>,
    focus_returns: u64,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    state: Mutex<ControllerState>,
    mode: Mutex<ControllerMode>,
    updates: broadcast::Sender<ConfigUpdate>,
    /// Serve loops, one per transport.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(initial: BlockingConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let state = ControllerState {
            session_active: initial.enabled,
            config: initial,
            ..ControllerState::default()
        };
        Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(state),
                mode: Mutex::new(ControllerMode::Online),
                updates,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start answering requests posted on `transport`.
    pub fn serve(&self, transport: Arc<dyn Transport>) {
        let receiver = transport.subscribe();
        let handle = tokio::spawn(serve_loop(Arc::downgrade(&self.inner), transport, receiver));
        lock(&self.inner.tasks).push(handle);
        info!("Controller listening");
    }

    /// Stop serving and cancel pending break timers.
    pub fn shutdown(&self) {
        self.inner.stop();
    }

    pub fn set_mode(&self, mode: ControllerMode) {
        info!("Controller mode -> {:?}", mode);
        *lock(&self.inner.mode) = mode;
    }

    pub fn mode(&self) -> ControllerMode {
        *lock(&self.inner.mode)
    }

    /// Current configuration, for a page instance starting up.
    pub fn snapshot(&self) -> BlockingConfig {
        lock(&self.inner.state).config.clone()
    }

    /// Change notifications, in publication order.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn status(&self) -> ControllerStatus {
        lock(&self.inner.state).status()
    }

    pub fn distractions(&self) -> Vec<DistractionEntry> {
        lock(&self.inner.state).distractions.iter().cloned().collect()
    }

    /// Apply a configuration change directly, as the settings UI would.
    pub fn publish(&self, update: ConfigUpdate) {
        let mut state = lock(&self.inner.state);
        self.inner.publish(&mut state, update);
    }

    /// Dispatch one request payload. `Err` carries the error string sent back.
    pub fn handle(&self, payload: Value) -> Result<Value, String> {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let command: Command = match serde_json::from_value(payload) {
            Ok(command) => command,
            Err(e) if KNOWN_TYPES.contains(&kind.as_str()) => {
                warn!("Malformed {} payload: {}", kind, e);
                return Err(format!("Invalid {kind} payload: {e}"));
            }
            Err(_) => {
                warn!("Unknown message type: '{}'", kind);
                return Err(UNKNOWN_MESSAGE_TYPE.to_string());
            }
        };

        debug!("Controller handling {}", command.kind());
        let mut state = lock(&self.inner.state);

        let reply = match command {
            Command::Ping | Command::HealthCheck => json!({
                "status": "connected",
                "pong": true,
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": now_ms(),
            }),
            Command::StartBlocking {
                blocked_sites,
                session_id,
            } => {
                state.session_active = true;
                state.session_id = session_id;
                state.end_break();
                let update = ConfigUpdate::replace(true, blocked_sites);
                self.inner.publish(&mut state, update);
                info!("Blocking started: {} site(s)", state.config.rules.len());
                json!({
                    "success": true,
                    "message": "Blocking started",
                    "sitesCount": state.config.rules.len(),
                })
            }
            Command::StopBlocking => {
                state.session_active = false;
                state.session_id = None;
                state.end_break();
                self.inner
                    .publish(&mut state, ConfigUpdate::replace(false, Vec::<String>::new()));
                info!("Blocking stopped");
                json!({"success": true, "message": "Blocking stopped"})
            }
            Command::SyncSettings { data } => {
                state.session_active = data.active;
                state.session_id = data.session_id;
                if !data.active {
                    state.end_break();
                }
                let enabled = state.session_active && !state.on_break;
                self.inner
                    .publish(&mut state, ConfigUpdate::replace(enabled, data.blocked_sites));
                json!({"success": true, "message": "Settings synced"})
            }
            Command::GetStatus => {
                serde_json::to_value(state.status()).map_err(|e| e.to_string())?
            }
            Command::LogDistraction { site, rule } => {
                let entry = DistractionEntry {
                    site,
                    rule,
                    timestamp: now_ms(),
                    session_id: state.session_id.clone(),
                };
                info!("Distraction logged: {} ({})", entry.site, entry.rule);
                state.distractions.push_back(entry);
                while state.distractions.len() > DISTRACTION_LOG_LIMIT {
                    state.distractions.pop_front();
                }
                json!({"success": true, "logged": state.distractions.len()})
            }
            Command::ReturnToFocus { site } => {
                state.focus_returns += 1;
                info!("User returned to focus from {}", site);
                json!({"success": true, "focusReturns": state.focus_returns})
            }
            Command::StartBreak { duration } => {
                state.end_break();
                state.on_break = true;
                let generation = state.break_generation;
                self.inner.publish(&mut state, ConfigUpdate::enabled(false));

                let length = Duration::from_secs(u64::from(duration) * 60);
                let timer = tokio::spawn(finish_break(Arc::downgrade(&self.inner), generation, length));
                state.break_timer = Some(timer);
                info!("Break started for {} minute(s)", duration);
                json!({"success": true, "duration": duration})
            }
        };

        Ok(reply)
    }
}

impl ControllerState {
    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            is_active: self.session_active,
            blocked_sites: self.config.rules.clone(),
            session_id: self.session_id.clone(),
            distraction_count: self.distractions.len(),
            focus_returns: self.focus_returns,
            on_break: self.on_break,
        }
    }

    fn end_break(&mut self) {
        self.on_break = false;
        self.break_generation += 1;
        if let Some(timer) = self.break_timer.take() {
            timer.abort();
        }
    }
}

impl ControllerInner {
    fn publish(&self, state: &mut ControllerState, update: ConfigUpdate) {
        state.config = state.config.apply(&update);
        debug!(
            "Publishing config: enabled={} rules={}",
            state.config.enabled,
            state.config.rules.len()
        );
        let _ = self.updates.send(update);
    }

    fn stop(&self) {
        for handle in lock(&self.tasks).drain(..) {
            handle.abort();
        }
        if let Some(timer) = lock(&self.state).break_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn finish_break(controller: Weak<ControllerInner>, generation: u64, length: Duration) {
    tokio::time::sleep(length).await;
    let Some(inner) = controller.upgrade() else {
        return;
    };
    let mut state = lock(&inner.state);
    if state.break_generation != generation || !state.on_break {
        return;
    }
    state.on_break = false;
    state.break_timer = None;
    if state.session_active {
        info!("Break over, blocking resumes");
        inner.publish(&mut state, ConfigUpdate::enabled(true));
    }
}

async fn serve_loop(
    controller: Weak<ControllerInner>,
    transport: Arc<dyn Transport>,
    mut receiver: broadcast::Receiver<Envelope>,
) {
    loop {
        let envelope = match receiver.recv().await {
            Ok(envelope) => envelope,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Controller lagged, {} envelope(s) lost", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Envelope::Request { id, payload } = envelope else {
            continue;
        };
        let Some(inner) = controller.upgrade() else {
            break;
        };
        let controller = Controller { inner };

        let response = match controller.mode() {
            ControllerMode::Silent => {
                debug!("Silent mode, dropping {}", id);
                continue;
            }
            ControllerMode::Unavailable => Envelope::error(&id, RECEIVER_UNAVAILABLE, None),
            ControllerMode::Online => match controller.handle(payload) {
                Ok(reply) => Envelope::response(&id, reply),
                Err(error) => Envelope::error(
                    &id,
                    &error,
                    Some(json!({"success": false, "error": error})),
                ),
            },
        };

        if let Err(e) = transport.post(response) {
            warn!("Failed to answer {}: {}", id, e);
        }
    }
    debug!("Controller stopped listening");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
