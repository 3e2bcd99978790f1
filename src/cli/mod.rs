//! CLI-specific functionality for sessionwarden
//!
//! This module contains argument parsing, configuration discovery and the
//! maintenance operations run against a session store.

pub mod args;
pub mod config;
pub mod maintenance;

pub use args::{Args, Commands, ExecutionMode};
pub use config::ConfigDiscovery;
pub use maintenance::{Maintenance, RecordReport};
