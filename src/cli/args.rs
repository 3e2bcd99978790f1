//! Command line argument parsing
//!
//! Subcommands:
//! - `gc`: Purge session records inactive beyond the configured expiration
//! - `list`: List stored session identifiers
//! - `inspect`: Print the contents of one session record
//! - `destroy`: Delete one session record
//! - `show-config`: Show configuration discovery information

use crate::session::SessionId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Gc { max_lifetime_secs: Option<u64> },
    List,
    Inspect(SessionId),
    Destroy(SessionId),
    ShowConfig,
}

#[derive(Debug, Parser)]
#[command(name = "sessionwarden")]
#[command(author = "Sessionwarden Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Maintenance tool for sessionwarden session stores")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Purge records inactive beyond the configured expiration
    Gc {
        /// Override the inactivity lifetime in seconds
        #[arg(long = "max-lifetime", value_name = "SECS")]
        max_lifetime: Option<u64>,
    },
    /// List stored session identifiers
    List,
    /// Print the contents of a session record
    Inspect {
        /// Session identifier
        session_id: String,
    },
    /// Delete a session record
    Destroy {
        /// Session identifier
        session_id: String,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Gc { max_lifetime }) => Ok(ExecutionMode::Gc {
                max_lifetime_secs: *max_lifetime,
            }),
            Some(Commands::List) => Ok(ExecutionMode::List),
            Some(Commands::Inspect { session_id }) => {
                Ok(ExecutionMode::Inspect(Self::parse_session_id(session_id)?))
            }
            Some(Commands::Destroy { session_id }) => {
                Ok(ExecutionMode::Destroy(Self::parse_session_id(session_id)?))
            }
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'sessionwarden --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    fn parse_session_id(raw: &str) -> Result<SessionId, String> {
        SessionId::parse(raw).ok_or_else(|| format!("'{}' is not a valid session identifier", raw))
    }
}
