//! Message Relay
//!
//! Request/response on top of a best-effort [`Transport`]. Every attempt gets
//! a fresh correlation id and a [`PendingRequest`] entry; a single listener
//! task routes responses to the matching entry. Responses whose id is not
//! pending (late, duplicated, or meant for another relay) are dropped.
//!
//! # Retries
//!
//! An attempt that times out, or that fails with a transient remote error,
//! is re-issued up to `max_retries` times. Timeouts back off by
//! `retry_base_delay * (attempt + 1)`; transient errors wait the fixed
//! `transient_retry_delay`. Anything else is surfaced immediately.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, trace, warn};
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::command::Command;
use crate::config::RelayConfig;
use crate::envelope::Envelope;
use crate::error::{RelayError, TransportError};
use crate::transport::Transport;

// =============================================================================
// Pending Requests
// =============================================================================

/// One outstanding attempt, owned by the relay until it completes or expires.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: String,
    pub deadline: Instant,
    pub attempt: u32,
    pub command: Command,
    responder: oneshot::Sender<Reply>,
}

#[derive(Debug)]
struct Reply {
    payload: Option<Value>,
    error: Option<String>,
}

impl Reply {
    fn into_result(self) -> Result<Value, RelayError> {
        if let Some(error) = self.error {
            return Err(RelayError::Remote(error));
        }
        match self.payload {
            Some(Value::Object(map)) => {
                if map.get("success") == Some(&Value::Bool(false)) {
                    let message = map
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("Request failed")
                        .to_string();
                    return Err(RelayError::Remote(message));
                }
                Ok(Value::Object(map))
            }
            Some(Value::Null) | None => Ok(Value::Object(Map::new())),
            Some(other) => Ok(other),
        }
    }
}

// =============================================================================
// Relay
// =============================================================================

/// Cloneable handle; all clones share one pending table and one listener.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    transport: Arc<dyn Transport>,
    config: RelayConfig,
    pending: Mutex<HashMap<String, PendingRequest>>,
    sequence: AtomicU64,
    closed: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Relay {
    /// Create a relay and attach its listener. Must be called from within a
    /// tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: RelayConfig) -> Self {
        let receiver = transport.subscribe();
        let inner = Arc::new(RelayInner {
            transport,
            config,
            pending: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            listener: Mutex::new(None),
        });

        let handle = tokio::spawn(listen(receiver, Arc::downgrade(&inner)));
        *lock(&inner.listener) = Some(handle);

        Self { inner }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Send `command` and wait for its response, retrying transient failures.
    pub async fn send(&self, command: Command) -> Result<Value, RelayError> {
        self.dispatch(command).await
    }

    /// Post the first attempt of `command` right away and return the rest of
    /// the exchange, retries included, as a detached future.
    ///
    /// The request is on the transport when this returns, so the future may
    /// be spawned, dropped or aborted without losing the first attempt.
    pub fn dispatch(
        &self,
        command: Command,
    ) -> impl Future<Output = Result<Value, RelayError>> + Send + 'static {
        let first = self.post(&command, 0, self.inner.config.request_timeout());
        let relay = self.clone();
        async move { relay.complete_with_retries(command, first).await }
    }

    /// Single attempt with an explicit deadline and no retries.
    pub async fn request(&self, command: &Command, timeout: Duration) -> Result<Value, RelayError> {
        self.send_once(command, 0, timeout).await
    }

    /// Number of attempts currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Detach the transport listener and drop every pending entry. Callers
    /// still waiting observe `TransportError::Closed`; later sends fail fast.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.detach();
        let dropped = {
            let mut pending = lock(&self.inner.pending);
            let count = pending.len();
            pending.clear();
            count
        };
        debug!("Relay shut down, {} pending request(s) dropped", dropped);
    }

    async fn complete_with_retries(
        &self,
        command: Command,
        first: Result<InFlight, RelayError>,
    ) -> Result<Value, RelayError> {
        let timeout = self.inner.config.request_timeout();
        let max_retries = self.inner.config.max_retries;
        let mut attempt = 0;
        let mut in_flight = first;

        loop {
            let outcome = match in_flight {
                Ok(in_flight) => self.wait(in_flight).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(payload) => return Ok(payload),
                Err(err) if err.is_transient() && attempt < max_retries => {
                    let delay = self.inner.config.retry_delay(attempt, &err);
                    warn!(
                        "{} failed ({}), retrying ({}/{}) in {:?}",
                        command.kind(),
                        err,
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                    in_flight = self.post(&command, attempt, timeout);
                }
                Err(RelayError::Timeout { .. }) => {
                    return Err(RelayError::Timeout {
                        attempts: attempt + 1,
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        command: &Command,
        attempt: u32,
        timeout: Duration,
    ) -> Result<Value, RelayError> {
        let in_flight = self.post(command, attempt, timeout)?;
        self.wait(in_flight).await
    }

    /// Register and post one attempt without waiting.
    fn post(&self, command: &Command, attempt: u32, timeout: Duration) -> Result<InFlight, RelayError> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }

        let id = self.inner.next_id(command);
        let envelope = Envelope::request(&id, command, attempt)?;
        let deadline = Instant::now() + timeout;
        let (responder, response) = oneshot::channel();

        self.inner.register(PendingRequest {
            id: id.clone(),
            deadline,
            attempt,
            command: command.clone(),
            responder,
        });

        if let Err(err) = self.inner.transport.post(envelope) {
            self.inner.forget(&id);
            return Err(err.into());
        }
        trace!("Posted {} as {} (attempt {})", command.kind(), id, attempt);

        Ok(InFlight {
            id,
            deadline,
            timeout,
            response,
        })
    }

    async fn wait(&self, in_flight: InFlight) -> Result<Value, RelayError> {
        let InFlight {
            id,
            deadline,
            timeout,
            response,
        } = in_flight;

        match time::timeout_at(deadline, response).await {
            Ok(Ok(reply)) => reply.into_result(),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                self.inner.forget(&id);
                debug!("{} timed out after {:?}", id, timeout);
                Err(RelayError::Timeout { attempts: 1 })
            }
        }
    }
}

/// An attempt that has been posted and awaits its reply.
struct InFlight {
    id: String,
    deadline: Instant,
    timeout: Duration,
    response: oneshot::Receiver<Reply>,
}

impl RelayInner {
    /// Random plus monotonic component; unique for the life of the relay.
    fn next_id(&self, command: &Command) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let prefix = if command.is_probe() { "ping" } else { "req" };
        format!("{}_{:x}_{}", prefix, sequence, Uuid::new_v4().simple())
    }

    fn register(&self, request: PendingRequest) {
        let mut pending = lock(&self.pending);
        // Entries whose waiter was dropped can never complete.
        pending.retain(|_, entry| !entry.responder.is_closed());
        let id = request.id.clone();
        if pending.insert(id.clone(), request).is_some() {
            warn!("Correlation id {} was already pending; previous entry replaced", id);
        }
    }

    fn forget(&self, id: &str) -> Option<PendingRequest> {
        lock(&self.pending).remove(id)
    }

    fn complete(&self, id: &str, reply: Reply) {
        match self.forget(id) {
            Some(request) => {
                trace!("Response for {} after attempt {}", id, request.attempt);
                // The waiting caller may be gone already; nothing to do then.
                let _ = request.responder.send(reply);
            }
            None => debug!("Dropping response for unknown id {}", id),
        }
    }

    fn detach(&self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
        }
    }
}

impl Drop for RelayInner {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn listen(mut receiver: broadcast::Receiver<Envelope>, relay: Weak<RelayInner>) {
    loop {
        let envelope = match receiver.recv().await {
            Ok(envelope) => envelope,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Relay listener lagged, {} envelope(s) lost", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Envelope::Response { id, payload, error } = envelope else {
            continue;
        };
        let Some(inner) = relay.upgrade() else {
            break;
        };
        inner.complete(&id, Reply { payload, error });
    }
    debug!("Relay listener stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
