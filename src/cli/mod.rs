//! Command-line interface for crash-monitor.
//!
//! Provides commands for running the scheduler, applying migrations, and
//! queueing priority requests.

mod commands;

pub use commands::{parse_cli, run_with_cli};
