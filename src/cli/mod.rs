//! Command-line interface for search-curator.
//!
//! Provides commands for startup recovery, task inspection, recommendation
//! runs and listing stored recommendations.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
