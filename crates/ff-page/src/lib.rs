//! FocusFlow Page
//!
//! The per-page-instance half of FocusFlow: decides whether the current
//! location is blocked, presents and removes the block surface, and routes
//! user actions back to the controller through the bridge.

pub mod blocker;
pub mod config;
pub mod page;
pub mod surface;

pub use blocker::Blocker;
pub use config::{ConfigSource, PageSettings, Settings};
pub use page::{Page, PageEvent, PageHandle, UserAction};
pub use surface::{BlockSurface, BlockView, Navigator, RecordingNavigator, RecordingSurface};
