//! Core type definitions for FocusFlow
//!
//! These types describe what a page instance needs to decide whether the
//! current location is blocked: the normalized rules, the configuration
//! snapshot they live in, and the resulting block state.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matcher;
use crate::url::normalize_site;

// =============================================================================
// Block Rules
// =============================================================================

/// Error returned when a raw site string normalizes to nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("site rule '{0}' is empty after normalization")]
pub struct EmptyRule(pub String);

/// A normalized site token.
///
/// Lowercased, without scheme, without a leading `www.` and without a single
/// trailing `/`. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockRule(String);

impl BlockRule {
    /// Normalize a raw site string into a rule. Returns `None` when nothing
    /// is left after normalization.
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = normalize_site(raw);
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BlockRule {
    type Error = EmptyRule;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value).ok_or(EmptyRule(value))
    }
}

impl From<BlockRule> for String {
    fn from(rule: BlockRule) -> Self {
        rule.0
    }
}

impl fmt::Display for BlockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize, drop empties and dedupe while keeping first-seen order.
pub fn collect_rules<I, S>(sites: I) -> Vec<BlockRule>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut rules = Vec::new();
    for site in sites {
        if let Some(rule) = BlockRule::new(site.as_ref()) {
            if seen.insert(rule.clone()) {
                rules.push(rule);
            }
        }
    }
    rules
}

// =============================================================================
// Configuration
// =============================================================================

/// Snapshot of the blocking configuration seen by one page instance.
///
/// Replaced wholesale on every update; rules are never merged individually.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawBlockingConfig")]
pub struct BlockingConfig {
    pub enabled: bool,
    pub rules: Vec<BlockRule>,
}

#[derive(Deserialize)]
struct RawBlockingConfig {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    rules: Vec<String>,
}

impl From<RawBlockingConfig> for BlockingConfig {
    fn from(raw: RawBlockingConfig) -> Self {
        Self::from_sites(raw.enabled, raw.rules)
    }
}

impl BlockingConfig {
    /// Build a configuration from raw site strings.
    pub fn from_sites<I, S>(enabled: bool, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            enabled,
            rules: collect_rules(sites),
        }
    }

    /// Produce the configuration that results from `update`.
    ///
    /// A missing top-level field keeps its current value; a present rule list
    /// replaces the previous one entirely.
    pub fn apply(&self, update: &ConfigUpdate) -> Self {
        Self {
            enabled: update.enabled.unwrap_or(self.enabled),
            rules: match &update.rules {
                Some(sites) => collect_rules(sites),
                None => self.rules.clone(),
            },
        }
    }

    pub fn contains(&self, rule: &BlockRule) -> bool {
        self.rules.iter().any(|r| r == rule)
    }

    /// First rule matching `location`, or `None` when disabled.
    pub fn matching_rule(&self, location: &str) -> Option<&BlockRule> {
        if !self.enabled {
            return None;
        }
        matcher::matches(location, &self.rules)
    }
}

/// A configuration change notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<String>>,
}

impl ConfigUpdate {
    /// Update carrying both fields.
    pub fn replace<I, S>(enabled: bool, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: Some(enabled),
            rules: Some(sites.into_iter().map(Into::into).collect()),
        }
    }

    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            rules: None,
        }
    }

    pub fn rules<I, S>(sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: None,
            rules: Some(sites.into_iter().map(Into::into).collect()),
        }
    }

    /// Coalesce two queued updates; fields present in `later` win.
    pub fn merge(self, later: ConfigUpdate) -> Self {
        Self {
            enabled: later.enabled.or(self.enabled),
            rules: later.rules.or(self.rules),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.rules.is_none()
    }
}

// =============================================================================
// Block State
// =============================================================================

/// Block state of a single page instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BlockState {
    #[default]
    Idle,
    Blocked(BlockRule),
}

impl BlockState {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }

    pub fn active_rule(&self) -> Option<&BlockRule> {
        match self {
            Self::Idle => None,
            Self::Blocked(rule) => Some(rule),
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Blocked(rule) => write!(f, "blocked by '{}'", rule),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_normalization() {
        assert_eq!(BlockRule::new("HTTPS://www.YouTube.com/").unwrap().as_str(), "youtube.com");
        assert_eq!(BlockRule::new("  reddit.com/r/all/ ").unwrap().as_str(), "reddit.com/r/all");
        assert!(BlockRule::new("https://www./").is_none());
        assert!(BlockRule::new("   ").is_none());
    }

    #[test]
    fn test_collect_rules_dedupes_in_order() {
        let rules = collect_rules(["b.com", "a.com", "www.b.com", "", "http://a.com/"]);
        let names: Vec<&str> = rules.iter().map(BlockRule::as_str).collect();
        assert_eq!(names, vec!["b.com", "a.com"]);
    }

    #[test]
    fn test_apply_replaces_rules_wholesale() {
        let config = BlockingConfig::from_sites(true, ["a.com", "b.com"]);

        let next = config.apply(&ConfigUpdate::rules(["c.com"]));
        assert!(next.enabled);
        assert_eq!(next.rules, collect_rules(["c.com"]));

        let disabled = next.apply(&ConfigUpdate::enabled(false));
        assert!(!disabled.enabled);
        assert_eq!(disabled.rules, next.rules);

        assert_eq!(disabled.apply(&ConfigUpdate::default()), disabled);
    }

    #[test]
    fn test_merge_last_update_wins() {
        let merged = ConfigUpdate::replace(true, ["a.com"])
            .merge(ConfigUpdate::enabled(false))
            .merge(ConfigUpdate::rules(["b.com"]));
        assert_eq!(merged.enabled, Some(false));
        assert_eq!(merged.rules, Some(vec!["b.com".to_string()]));
    }

    #[test]
    fn test_disabled_config_never_matches() {
        let config = BlockingConfig::from_sites(false, ["youtube.com"]);
        assert_eq!(config.matching_rule("https://youtube.com/"), None);
    }

    #[test]
    fn test_config_json_shape() {
        let config: BlockingConfig =
            serde_json::from_str(r#"{"enabled":true,"rules":["WWW.X.com/","x.com","y.org"]}"#).unwrap();
        assert_eq!(config.rules, collect_rules(["x.com", "y.org"]));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!({"enabled": true, "rules": ["x.com", "y.org"]}));

        let update: ConfigUpdate = serde_json::from_str(r#"{"enabled":false}"#).unwrap();
        assert_eq!(update, ConfigUpdate::enabled(false));
    }
}
