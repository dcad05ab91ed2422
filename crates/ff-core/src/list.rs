//! Block-list ingestion
//!
//! Turns user-maintained list files into rules. Accepts plain site lines,
//! adblock host anchors (`||domain^`) and hosts-file entries.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use log::debug;

use crate::types::{collect_rules, BlockRule};

/// Error type for list loading.
#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse list text into deduplicated rules, preserving first-seen order.
pub fn parse_block_list(text: &str) -> Vec<BlockRule> {
    let mut sites = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        if let Some(domain) = parse_host_anchor_rule(line) {
            sites.push(domain);
            continue;
        }

        if let Some(domain) = parse_hosts_file_domain(line) {
            sites.push(domain);
            continue;
        }

        sites.push(line);
    }

    collect_rules(sites)
}

/// Read and merge several list files.
pub fn load_block_lists<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<BlockRule>, ListError> {
    let mut merged = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ListError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let rules = parse_block_list(&content);
        debug!("Loaded {} rules from '{}'", rules.len(), path.display());
        merged.extend(rules.into_iter().map(String::from));
    }
    Ok(collect_rules(merged))
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || line.starts_with('#')
}

fn parse_host_anchor_rule(line: &str) -> Option<&str> {
    let mut rest = line.strip_prefix("||")?;
    if let Some(stripped) = rest.strip_prefix('.') {
        rest = stripped;
    }

    let end = rest
        .find(|c: char| c == '^' || c == '|' || c == '$')
        .unwrap_or(rest.len());
    let host = &rest[..end];
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn parse_hosts_file_domain(line: &str) -> Option<&str> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;

    if first.parse::<IpAddr>().is_ok() {
        return Some(second);
    }

    None
}
