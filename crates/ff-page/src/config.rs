//! Page settings and the configuration source seam.

use ff_bridge::{Controller, MonitorConfig, RelayConfig};
use ff_core::{BlockingConfig, ConfigUpdate};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Destinations and break length used by the user actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub focus_url: String,
    pub break_url: String,
    pub break_minutes: u32,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            focus_url: "https://focusflows.eu/focus".to_string(),
            break_url: "https://focusflows.eu/dashboard".to_string(),
            break_minutes: 5,
        }
    }
}

/// Everything a page instance can be tuned with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub relay: RelayConfig,
    pub monitor: MonitorConfig,
    pub page: PageSettings,
}

/// Where a page instance reads its blocking configuration from.
pub trait ConfigSource: Send + Sync {
    /// Current configuration.
    fn snapshot(&self) -> BlockingConfig;

    /// Change notifications published after this call.
    fn subscribe(&self) -> broadcast::Receiver<ConfigUpdate>;
}

impl ConfigSource for Controller {
    fn snapshot(&self) -> BlockingConfig {
        Controller::snapshot(self)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigUpdate> {
        Controller::subscribe(self)
    }
}
