//! FocusFlow Core Library
//!
//! This crate holds the synchronous part of the blocker: rule normalization,
//! the blocking configuration and the site matcher. It has no async runtime
//! dependency so it can be reused by any host.
//!
//! # Modules
//!
//! - `url`: scheme stripping, normalization and host extraction
//! - `matcher`: location to rule matching
//! - `list`: block-list file ingestion
//! - `types`: shared type definitions

pub mod list;
pub mod matcher;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use list::{load_block_lists, parse_block_list, ListError};
pub use matcher::{matches, Matcher};
pub use types::{BlockRule, BlockState, BlockingConfig, ConfigUpdate};
