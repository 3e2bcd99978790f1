//! # Sessionwarden
//!
//! Server-side session state for request/response services. A session is
//! resumed at the start of every request cycle, mutated by the caller and
//! written back through a pluggable storage handler when the cycle closes.
//!
//! ## Architecture Overview
//!
//! - **[`session`]**: the cycle state machine: identifier rotation, flash data
//!   (visible for one more cycle) and temp data (visible until a TTL elapses)
//! - **[`handler`]**: storage backends behind the [`SessionHandler`] trait,
//!   with per-identifier locking
//! - **[`clock`]**: injectable time source for deterministic expiry
//! - **[`cli`]**: maintenance commands (gc, inspect, destroy)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sessionwarden::{RequestContext, SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut session = SessionManager::from_config(SessionConfig::in_memory())?;
//!
//!     let outcome = session.start(&RequestContext::new()).await?;
//!     session.set("user_id", 42);
//!     session.set_flashdata("notice", "Profile saved");
//!     session.close().await?;
//!
//!     println!("Set-Cookie: {}", outcome.cookie.to_header_value());
//!     Ok(())
//! }
//! ```

/// Session cycle management.
///
/// Identifier lifecycle, the per-cycle data store, and the flash and temp
/// data trackers layered on top of it.
pub mod session;

/// Storage backends for serialized session records.
pub mod handler;

/// Time sources.
pub mod clock;

/// Environment constants and path utilities.
pub mod env;

/// Maintenance command-line interface.
pub mod cli;

pub use clock::{Clock, MockClock, SystemClock};
pub use handler::{FileHandler, LockTable, MemoryHandler, SessionHandler, SessionLock, build_handler};
pub use session::{
    FlashDataTracker, IdentityManager, IdentityState, Marker, RequestContext, SessionConfig,
    SessionCookie, SessionDriver, SessionError, SessionId, SessionManager, SessionStore,
    SessionSummary, StartOutcome, TempDataTracker,
};
