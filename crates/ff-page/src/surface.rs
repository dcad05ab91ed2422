//! Seams to the host UI: the block surface and page navigation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ff_core::BlockRule;

/// What the block surface presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockView {
    pub location: String,
    pub rule: BlockRule,
}

pub trait BlockSurface: Send {
    fn show(&mut self, view: &BlockView);
    fn remove(&mut self);
}

pub trait Navigator: Send {
    fn navigate(&mut self, destination: &str);
}

// =============================================================================
// Recording implementations
// =============================================================================

#[derive(Debug, Default)]
pub struct SurfaceLog {
    pub shown: usize,
    pub removed: usize,
    pub current: Option<BlockView>,
}

/// Surface that only records calls. Clones share one log.
#[derive(Debug, Default, Clone)]
pub struct RecordingSurface {
    log: Arc<Mutex<SurfaceLog>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> usize {
        lock(&self.log).shown
    }

    pub fn removed(&self) -> usize {
        lock(&self.log).removed
    }

    pub fn current(&self) -> Option<BlockView> {
        lock(&self.log).current.clone()
    }
}

impl BlockSurface for RecordingSurface {
    fn show(&mut self, view: &BlockView) {
        let mut log = lock(&self.log);
        log.shown += 1;
        log.current = Some(view.clone());
    }

    fn remove(&mut self) {
        let mut log = lock(&self.log);
        log.removed += 1;
        log.current = None;
    }
}

/// Navigator that only records destinations. Clones share one list.
#[derive(Debug, Default, Clone)]
pub struct RecordingNavigator {
    destinations: Arc<Mutex<Vec<String>>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destinations(&self) -> Vec<String> {
        lock(&self.destinations).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&mut self, destination: &str) {
        lock(&self.destinations).push(destination.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
