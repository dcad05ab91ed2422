//! Site Matcher
//!
//! Decides whether a location is covered by a block-list. Pure and
//! allocation-light: called on every navigation of every page instance.

use log::trace;

use crate::types::{BlockRule, BlockingConfig};
use crate::url::{is_internal_location, normalize_site, normalized_host};

// =============================================================================
// Matcher
// =============================================================================

/// First rule in `rules` that matches `location`.
///
/// A rule matches when the normalized location contains it as a substring, or
/// when the location's host equals the rule or `www.<rule>`. Substring
/// matching is intentional: `facebook.com` also matches
/// `myfacebook.com.evil.test`.
pub fn matches<'r>(location: &str, rules: &'r [BlockRule]) -> Option<&'r BlockRule> {
    if rules.is_empty() || is_internal_location(location) {
        return None;
    }

    let normalized = normalize_site(location);
    let host = normalized_host(&normalized);

    let found = rules.iter().find(|rule| rule_matches(&normalized, host, rule));
    if let Some(rule) = found {
        trace!("'{}' matched rule '{}'", location, rule);
    }
    found
}

#[inline]
fn rule_matches(normalized: &str, host: &str, rule: &BlockRule) -> bool {
    let rule = rule.as_str();
    normalized.contains(rule) || host == rule || host.strip_prefix("www.") == Some(rule)
}

/// Matcher bound to a configuration snapshot.
pub struct Matcher<'a> {
    config: &'a BlockingConfig,
    exempt_prefixes: Vec<String>,
}

impl<'a> Matcher<'a> {
    pub fn new(config: &'a BlockingConfig) -> Self {
        Self {
            config,
            exempt_prefixes: Vec::new(),
        }
    }

    /// Exempt every location starting with `prefix` (case-insensitive), e.g.
    /// the page that hosts the block surface.
    pub fn add_exempt_prefix(&mut self, prefix: &str) {
        self.exempt_prefixes.push(prefix.to_ascii_lowercase());
    }

    /// Decide a location. `None` means allowed.
    pub fn match_location(&self, location: &str) -> Option<&'a BlockRule> {
        if !self.config.enabled {
            return None;
        }
        let lowered = location.trim().to_ascii_lowercase();
        if self.exempt_prefixes.iter().any(|p| lowered.starts_with(p.as_str())) {
            return None;
        }
        matches(location, &self.config.rules)
    }
}
