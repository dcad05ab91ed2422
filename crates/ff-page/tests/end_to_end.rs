//! Controller and page instance wired over one in-process transport.

use std::sync::Arc;
use std::time::Duration;

use ff_bridge::{BroadcastTransport, Controller, ControllerMode};
use ff_core::{BlockRule, BlockState, BlockingConfig, ConfigUpdate};
use ff_page::{Page, PageHandle, RecordingNavigator, RecordingSurface, Settings, UserAction};

struct Harness {
    controller: Controller,
    transport: Arc<BroadcastTransport>,
    surface: RecordingSurface,
    navigator: RecordingNavigator,
}

impl Harness {
    fn new(config: BlockingConfig) -> Self {
        let transport = Arc::new(BroadcastTransport::new());
        let controller = Controller::new(config);
        controller.serve(transport.clone());
        Self {
            controller,
            transport,
            surface: RecordingSurface::new(),
            navigator: RecordingNavigator::new(),
        }
    }

    fn open(&self, location: &str) -> PageHandle<RecordingSurface, RecordingNavigator> {
        Page::start(
            Arc::new(self.controller.clone()),
            self.transport.clone(),
            Settings::default(),
            location,
            self.surface.clone(),
            self.navigator.clone(),
        )
        .spawn()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn blocked_on(rule: &str) -> Option<BlockState> {
    Some(BlockState::Blocked(BlockRule::new(rule).unwrap()))
}

#[tokio::test(start_paused = true)]
async fn test_youtube_block_then_return() {
    let harness = Harness::new(BlockingConfig::from_sites(true, ["youtube.com"]));
    let page = harness.open("https://focusflows.eu/focus");
    assert_eq!(page.state().await, Some(BlockState::Idle));

    page.navigate("https://youtube.com/watch?v=1").await;
    assert_eq!(page.state().await, blocked_on("youtube.com"));
    assert!(page.flush().await);

    assert_eq!(harness.surface.shown(), 1);
    let distractions = harness.controller.distractions();
    assert_eq!(distractions.len(), 1);
    assert_eq!(distractions[0].site, "https://youtube.com/watch?v=1");
    assert_eq!(distractions[0].rule, "youtube.com");

    page.act(UserAction::ReturnToFocus).await;
    assert_eq!(page.state().await, Some(BlockState::Idle));
    assert!(page.flush().await);
    assert_eq!(harness.controller.status().focus_returns, 1);
    assert_eq!(harness.surface.removed(), 1);
    assert!(harness.surface.current().is_none());
    assert_eq!(harness.navigator.destinations(), vec!["https://focusflows.eu/focus"]);

    page.close().await.unwrap();
    tokio::task::yield_now().await;
    // Only the controller is still listening.
    assert_eq!(harness.transport.listener_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_break_pauses_other_pages_until_it_ends() {
    let harness = Harness::new(BlockingConfig::from_sites(true, ["reddit.com"]));
    let first = harness.open("https://reddit.com/r/rust");
    let second = harness.open("https://old.reddit.com/");
    assert_eq!(first.state().await, blocked_on("reddit.com"));
    assert_eq!(second.state().await, blocked_on("reddit.com"));

    first.act(UserAction::TakeBreak).await;
    settle().await;
    assert_eq!(first.state().await, Some(BlockState::Idle));
    assert_eq!(second.state().await, Some(BlockState::Idle));
    assert_eq!(harness.navigator.destinations(), vec!["https://focusflows.eu/dashboard"]);

    // Blocking resumes after the break, but only new navigations are blocked.
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    assert!(harness.controller.snapshot().enabled);
    assert_eq!(second.state().await, Some(BlockState::Idle));
    second.navigate("https://reddit.com/r/all").await;
    assert_eq!(second.state().await, blocked_on("reddit.com"));

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_blocking_releases_open_pages() {
    let harness = Harness::new(BlockingConfig::from_sites(true, ["x.com"]));
    let page = harness.open("https://x.com/home");
    assert_eq!(page.state().await, blocked_on("x.com"));

    harness
        .controller
        .handle(serde_json::json!({"type": "STOP_BLOCKING"}))
        .unwrap();
    settle().await;
    assert_eq!(page.state().await, Some(BlockState::Idle));
    assert_eq!(harness.surface.removed(), 1);

    harness.controller.publish(ConfigUpdate::replace(true, ["x.com"]));
    settle().await;
    assert_eq!(page.state().await, Some(BlockState::Idle));

    page.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_controller_still_blocks_and_navigates() {
    let harness = Harness::new(BlockingConfig::from_sites(true, ["youtube.com"]));
    harness.controller.set_mode(ControllerMode::Unavailable);
    let page = harness.open("https://youtube.com/");
    assert_eq!(page.state().await, blocked_on("youtube.com"));

    page.act(UserAction::ReturnToFocus).await;
    assert_eq!(page.state().await, Some(BlockState::Idle));
    assert_eq!(harness.navigator.destinations(), vec!["https://focusflows.eu/focus"]);
    assert_eq!(harness.controller.status().focus_returns, 0);

    let blocker = page.close().await.unwrap();
    assert!(!blocker.bridge().is_connected());
}
