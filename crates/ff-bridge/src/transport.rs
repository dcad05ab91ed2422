//! Transport contract and an in-process broadcast implementation.
//!
//! A transport is one-way and best-effort: every subscriber sees every
//! posted envelope, in no guaranteed order relative to other posters, and
//! messages may be lost.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::envelope::Envelope;
use crate::error::TransportError;

const DEFAULT_CAPACITY: usize = 256;

pub trait Transport: Send + Sync {
    /// Post an envelope to every subscriber.
    fn post(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Attach a new listener. Dropping the receiver detaches it.
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// Shared channel between contexts living in one process.
pub struct BroadcastTransport {
    tx: broadcast::Sender<Envelope>,
    closed: AtomicBool,
}

impl BroadcastTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Listeners that fall more than `capacity` envelopes behind lose the
    /// oldest ones.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Tear the channel down; further posts fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for BroadcastTransport {
    fn post(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(envelope)
            .map(|_| ())
            .map_err(|_| TransportError::NoReceiver)
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}
