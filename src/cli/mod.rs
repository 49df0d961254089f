//! Command-line interface for autobench.
//!
//! Provides the long-running `run` command and the operator-driven `once`
//! command for a single on-demand batch.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
