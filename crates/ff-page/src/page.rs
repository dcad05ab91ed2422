//! Page-instance event loop.
//!
//! A [`Page`] wires one [`Blocker`] to its configuration source, its bridge
//! and the host's navigation and user-action events. Everything for one
//! instance runs on a single task, so the block state is never touched
//! concurrently.

use std::sync::Arc;

use ff_bridge::{Bridge, ConnectionEvent, Transport};
use ff_core::{BlockState, ConfigUpdate};
use log::{debug, info, warn};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

use crate::blocker::Blocker;
use crate::config::{ConfigSource, Settings};
use crate::surface::{BlockSurface, Navigator};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    ReturnToFocus,
    TakeBreak,
}

/// Input from the host page.
#[derive(Debug)]
pub enum PageEvent {
    Navigated(String),
    Action(UserAction),
    /// Report the current block state.
    Inspect(oneshot::Sender<BlockState>),
    /// Reply once every in-flight notification has settled.
    Flush(oneshot::Sender<()>),
    Teardown,
}

pub struct Page<S, N> {
    blocker: Blocker<S, N>,
    source: Arc<dyn ConfigSource>,
    updates: broadcast::Receiver<ConfigUpdate>,
    connection: broadcast::Receiver<ConnectionEvent>,
}

impl<S: BlockSurface, N: Navigator> Page<S, N> {
    /// Read the initial configuration, build the bridge and start the
    /// connection monitor. The first evaluation happens in [`run`](Self::run),
    /// so updates published in between are not lost.
    pub fn start(
        source: Arc<dyn ConfigSource>,
        transport: Arc<dyn Transport>,
        settings: Settings,
        location: impl Into<String>,
        surface: S,
        navigator: N,
    ) -> Self {
        // Subscribe first: anything published after the snapshot is queued.
        let updates = source.subscribe();
        let config = source.snapshot();

        let bridge = Bridge::new(transport, settings.relay, settings.monitor);
        let connection = bridge.events();
        bridge.start();

        let blocker = Blocker::new(config, location, surface, navigator, bridge, settings.page);
        Self {
            blocker,
            source,
            updates,
            connection,
        }
    }

    pub fn blocker(&self) -> &Blocker<S, N> {
        &self.blocker
    }

    /// Process events until `Teardown` or until every sender is gone, then
    /// tear the instance down and hand the blocker back.
    pub async fn run(self, mut events: mpsc::Receiver<PageEvent>) -> Blocker<S, N> {
        let Page {
            mut blocker,
            source,
            mut updates,
            mut connection,
        } = self;

        apply_queued(&mut blocker, source.as_ref(), &mut updates);
        blocker.evaluate();

        let mut updates_open = true;
        let mut connection_open = true;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(PageEvent::Navigated(location)) => blocker.navigate(location),
                    Some(PageEvent::Action(UserAction::ReturnToFocus)) => {
                        blocker.return_to_focus();
                    }
                    Some(PageEvent::Action(UserAction::TakeBreak)) => {
                        blocker.take_break();
                    }
                    Some(PageEvent::Inspect(reply)) => {
                        let _ = reply.send(blocker.state().clone());
                    }
                    Some(PageEvent::Flush(reply)) => {
                        blocker.flush().await;
                        let _ = reply.send(());
                    }
                    Some(PageEvent::Teardown) | None => break,
                },
                update = updates.recv(), if updates_open => match update {
                    Ok(update) => blocker.apply_config(&update),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} config update(s), resyncing", skipped);
                        blocker.replace_config(source.snapshot());
                    }
                    Err(RecvError::Closed) => {
                        warn!("Configuration source closed, keeping last snapshot");
                        updates_open = false;
                    }
                },
                event = connection.recv(), if connection_open => match event {
                    Ok(ConnectionEvent::Ready { connected }) => {
                        info!("Bridge ready (connected: {})", connected);
                    }
                    Ok(ConnectionEvent::Recovered) => info!("Bridge connection recovered"),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => connection_open = false,
                },
            }
        }

        blocker.teardown();
        blocker
    }
}

impl<S, N> Page<S, N>
where
    S: BlockSurface + 'static,
    N: Navigator + 'static,
{
    /// Run the page on its own task.
    pub fn spawn(self) -> PageHandle<S, N> {
        let (events, receiver) = mpsc::channel(EVENT_CAPACITY);
        let task = tokio::spawn(self.run(receiver));
        PageHandle { events, task }
    }
}

/// Coalesce whatever arrived before the first evaluation; last update wins.
fn apply_queued<S: BlockSurface, N: Navigator>(
    blocker: &mut Blocker<S, N>,
    source: &dyn ConfigSource,
    updates: &mut broadcast::Receiver<ConfigUpdate>,
) {
    let mut queued = ConfigUpdate::default();
    let mut count = 0;
    loop {
        match updates.try_recv() {
            Ok(update) => {
                queued = queued.merge(update);
                count += 1;
            }
            Err(TryRecvError::Lagged(_)) => {
                queued = ConfigUpdate::default();
                blocker.replace_config(source.snapshot());
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    if count > 0 {
        debug!("Coalesced {} early config update(s)", count);
        blocker.apply_config(&queued);
    }
}

/// Handle to a page running on its own task.
pub struct PageHandle<S, N> {
    events: mpsc::Sender<PageEvent>,
    task: JoinHandle<Blocker<S, N>>,
}

impl<S, N> PageHandle<S, N> {
    /// Returns `false` once the page has stopped.
    pub async fn navigate(&self, location: impl Into<String>) -> bool {
        self.send(PageEvent::Navigated(location.into())).await
    }

    pub async fn act(&self, action: UserAction) -> bool {
        self.send(PageEvent::Action(action)).await
    }

    /// Block state after every previously sent event was handled.
    pub async fn state(&self) -> Option<BlockState> {
        let (reply, response) = oneshot::channel();
        if !self.send(PageEvent::Inspect(reply)).await {
            return None;
        }
        response.await.ok()
    }

    /// Wait until background notifications sent so far have settled.
    pub async fn flush(&self) -> bool {
        let (reply, done) = oneshot::channel();
        self.send(PageEvent::Flush(reply)).await && done.await.is_ok()
    }

    /// Tear the page down and wait for its task.
    pub async fn close(self) -> Result<Blocker<S, N>, JoinError> {
        let _ = self.events.send(PageEvent::Teardown).await;
        self.task.await
    }

    async fn send(&self, event: PageEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{RecordingNavigator, RecordingSurface};
    use ff_bridge::{BroadcastTransport, Controller};
    use ff_core::{BlockRule, BlockingConfig};
    use std::time::Duration;

    fn page_over(
        controller: &Controller,
        transport: &Arc<BroadcastTransport>,
        location: &str,
    ) -> (Page<RecordingSurface, RecordingNavigator>, RecordingSurface) {
        let surface = RecordingSurface::new();
        let page = Page::start(
            Arc::new(controller.clone()),
            transport.clone(),
            Settings::default(),
            location,
            surface.clone(),
            RecordingNavigator::new(),
        );
        (page, surface)
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_updates_coalesce_before_first_evaluation() {
        let transport = Arc::new(BroadcastTransport::new());
        let controller = Controller::new(BlockingConfig::from_sites(false, ["youtube.com"]));
        controller.serve(transport.clone());
        let (page, surface) = page_over(&controller, &transport, "https://reddit.com/");

        controller.publish(ConfigUpdate::enabled(true));
        controller.publish(ConfigUpdate::rules(["twitter.com"]));
        controller.publish(ConfigUpdate::rules(["reddit.com"]));

        let handle = page.spawn();
        assert_eq!(
            handle.state().await,
            Some(BlockState::Blocked(BlockRule::new("reddit.com").unwrap()))
        );
        assert_eq!(surface.shown(), 1);
        handle.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_updates_release_block() {
        let transport = Arc::new(BroadcastTransport::new());
        let controller = Controller::new(BlockingConfig::from_sites(true, ["youtube.com"]));
        controller.serve(transport.clone());
        let (page, surface) = page_over(&controller, &transport, "https://youtube.com/");
        let handle = page.spawn();
        assert!(handle.state().await.unwrap().is_blocked());

        controller.publish(ConfigUpdate::enabled(false));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state().await, Some(BlockState::Idle));
        assert_eq!(surface.removed(), 1);

        let blocker = handle.close().await.unwrap();
        assert!(blocker.is_torn_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_stopped_page() {
        let transport = Arc::new(BroadcastTransport::new());
        let controller = Controller::new(BlockingConfig::default());
        let (page, _) = page_over(&controller, &transport, "https://example.com/");
        let (events, receiver) = mpsc::channel(1);
        drop(events);

        // Every sender gone: the loop ends and tears down on its own.
        let blocker = page.run(receiver).await;
        assert!(blocker.is_torn_down());
        assert!(blocker.bridge().relay().is_closed());
    }
}
