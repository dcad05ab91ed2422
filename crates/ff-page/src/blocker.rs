//! Blocking State Machine
//!
//! One [`Blocker`] per page instance. It owns the single [`BlockState`], the
//! configuration snapshot the page currently believes in, and the block
//! surface. Navigations re-evaluate from `Idle`; configuration changes at an
//! unchanged location can only release a block, never create one.

use ff_bridge::{Bridge, Command};
use ff_core::url::extract_host;
use ff_core::{BlockRule, BlockState, BlockingConfig, ConfigUpdate, Matcher};
use log::{debug, info, warn};
use tokio::task::JoinSet;

use crate::config::PageSettings;
use crate::surface::{BlockSurface, BlockView, Navigator};

/// Idempotent wrapper: at most one view is presented at any time.
struct Presenter<S> {
    surface: S,
    current: Option<BlockView>,
}

impl<S: BlockSurface> Presenter<S> {
    fn show(&mut self, view: BlockView) {
        if self.current.is_some() {
            return;
        }
        self.surface.show(&view);
        self.current = Some(view);
    }

    fn remove(&mut self) {
        if self.current.take().is_some() {
            self.surface.remove();
        }
    }
}

pub struct Blocker<S, N> {
    state: BlockState,
    config: BlockingConfig,
    location: String,
    presenter: Presenter<S>,
    navigator: N,
    bridge: Bridge,
    settings: PageSettings,
    /// Fire-and-forget notifications still in flight.
    background: JoinSet<()>,
    torn_down: bool,
}

impl<S: BlockSurface, N: Navigator> Blocker<S, N> {
    /// Create an `Idle` blocker. Nothing is evaluated until
    /// [`evaluate`](Self::evaluate) runs.
    pub fn new(
        config: BlockingConfig,
        location: impl Into<String>,
        surface: S,
        navigator: N,
        bridge: Bridge,
        settings: PageSettings,
    ) -> Self {
        Self {
            state: BlockState::Idle,
            config,
            location: location.into(),
            presenter: Presenter {
                surface,
                current: None,
            },
            navigator,
            bridge,
            settings,
            background: JoinSet::new(),
            torn_down: false,
        }
    }

    pub fn state(&self) -> &BlockState {
        &self.state
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn config(&self) -> &BlockingConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Run the matcher against the current location and configuration.
    pub fn evaluate(&mut self) {
        if self.torn_down {
            return;
        }
        let found = {
            let mut matcher = Matcher::new(&self.config);
            matcher.add_exempt_prefix(&self.settings.focus_url);
            matcher.add_exempt_prefix(&self.settings.break_url);
            matcher.match_location(&self.location).cloned()
        };
        match found {
            Some(rule) => self.enter_blocked(rule),
            None => self.enter_idle(),
        }
    }

    /// The page moved: forget the previous match and evaluate from `Idle`.
    pub fn navigate(&mut self, location: impl Into<String>) {
        if self.torn_down {
            return;
        }
        self.enter_idle();
        self.location = location.into();
        debug!("Navigated to {}", self.location);
        self.evaluate();
    }

    /// Apply a change notification on top of the current snapshot.
    pub fn apply_config(&mut self, update: &ConfigUpdate) {
        if self.torn_down || update.is_empty() {
            return;
        }
        let next = self.config.apply(update);
        self.replace_config(next);
    }

    /// Swap in a whole new snapshot.
    pub fn replace_config(&mut self, config: BlockingConfig) {
        if self.torn_down {
            return;
        }
        debug!(
            "Config replaced: enabled={} rules={}",
            config.enabled,
            config.rules.len()
        );
        self.config = config;

        let released = match &self.state {
            BlockState::Blocked(rule) => !self.config.enabled || !self.config.contains(rule),
            BlockState::Idle => false,
        };
        if released {
            info!("Block on {} released by configuration", self.location);
            self.enter_idle();
        }
    }

    /// User chose to go back to work. Returns whether the page left the
    /// block; the controller hears about it in the background.
    pub fn return_to_focus(&mut self) -> bool {
        if !self.is_actionable("return to focus") {
            return false;
        }
        let command = Command::ReturnToFocus {
            site: self.location.clone(),
        };
        let destination = self.settings.focus_url.clone();
        self.leave(command, &destination);
        true
    }

    /// User chose to take a break. Same shape as
    /// [`return_to_focus`](Self::return_to_focus).
    pub fn take_break(&mut self) -> bool {
        if !self.is_actionable("take a break") {
            return false;
        }
        let command = Command::StartBreak {
            duration: self.settings.break_minutes,
        };
        let destination = self.settings.break_url.clone();
        self.leave(command, &destination);
        true
    }

    /// Wait for every in-flight notification to settle.
    pub async fn flush(&mut self) {
        while self.background.join_next().await.is_some() {}
    }

    /// Stop all background work and detach from the transport. Later calls
    /// on this blocker are no-ops.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.background.abort_all();
        self.bridge.shutdown();
        debug!("Page instance at {} torn down", self.location);
    }

    fn is_actionable(&self, action: &str) -> bool {
        if self.torn_down {
            return false;
        }
        if !self.state.is_blocked() {
            debug!("Ignoring '{}' while not blocked", action);
            return false;
        }
        true
    }

    /// The first attempt is posted before navigating, so teardown right
    /// after can only cancel retries.
    fn leave(&mut self, command: Command, destination: &str) {
        let kind = command.kind();
        let exchange = self.bridge.dispatch(command);
        self.background.spawn(async move {
            if let Err(err) = exchange.await {
                warn!("{} not delivered: {}", kind, err);
            }
        });

        self.enter_idle();
        info!("Leaving {} for {}", self.location, destination);
        self.navigator.navigate(destination);
    }

    fn enter_blocked(&mut self, rule: BlockRule) {
        if self.state.active_rule() == Some(&rule) {
            return;
        }
        self.enter_idle();
        let host = extract_host(&self.location).unwrap_or(&self.location);
        info!("Blocking {} (rule '{}')", host, rule);
        self.state = BlockState::Blocked(rule.clone());
        self.presenter.show(BlockView {
            location: self.location.clone(),
            rule: rule.clone(),
        });

        let command = Command::LogDistraction {
            site: self.location.clone(),
            rule: rule.into(),
        };
        let exchange = self.bridge.dispatch(command);
        self.background.spawn(async move {
            if let Err(err) = exchange.await {
                debug!("Distraction not recorded: {}", err);
            }
        });
    }

    fn enter_idle(&mut self) {
        self.state = BlockState::Idle;
        self.presenter.remove();
    }
}
