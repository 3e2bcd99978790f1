//! Storage backends for session records.
//!
//! The session core talks to storage only through [`SessionHandler`]. A
//! handler owns persistence of the opaque payload and mutual exclusion
//! between cycles that share an identifier.

pub mod file;
pub mod memory;

pub use file::FileHandler;
pub use memory::MemoryHandler;

use crate::session::config::{SessionConfig, SessionDriver};
use crate::session::types::{Result, SessionId};
use async_trait::async_trait;
use dashmap::DashMap;
use fs2::FileExt;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Durable key-value persistence for serialized session records
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Acquire exclusive access to a record. Waits while another cycle holds it.
    async fn open(&self, id: &SessionId) -> Result<SessionLock>;

    /// Read a record; `None` when no record exists
    async fn read(&self, id: &SessionId) -> Result<Option<Vec<u8>>>;

    /// Replace a record
    async fn write(&self, id: &SessionId, payload: &[u8]) -> Result<()>;

    /// Whether a record exists for the identifier
    async fn exists(&self, id: &SessionId) -> Result<bool>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn destroy(&self, id: &SessionId) -> Result<()>;

    /// Release the access acquired by `open`
    async fn close(&self, lock: SessionLock) -> Result<()> {
        drop(lock);
        Ok(())
    }

    /// Purge records inactive for longer than `max_lifetime`, skipping records
    /// that are currently open. Returns the number of purged records.
    async fn gc(&self, max_lifetime: Duration) -> Result<usize>;

    /// Identifiers of every stored record
    async fn ids(&self) -> Result<Vec<SessionId>>;
}

/// Exclusive access to one session record.
///
/// Dropping the lock releases it, so a cycle that ends on an error path
/// cannot keep the record locked. Backends shared between processes also
/// attach the advisory lock file they hold.
#[derive(Debug)]
pub struct SessionLock {
    id: SessionId,
    guard: Option<OwnedMutexGuard<()>>,
    table: Option<LockTable>,
    file: Option<File>,
}

impl SessionLock {
    /// A lock that excludes nothing, for backends without concurrency control
    pub fn unguarded(id: SessionId) -> Self {
        Self {
            id,
            guard: None,
            table: None,
            file: None,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    /// Keep an exclusively locked file until this lock is released
    pub(crate) fn holding(mut self, file: File) -> Self {
        self.file = Some(file);
        self
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        // File lock is released before local waiters wake
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        drop(self.guard.take());
        if let Some(table) = &self.table {
            table.prune(self.id.as_str());
        }
    }
}

/// Per-identifier async mutexes shared by a handler's cycles
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of one identifier
    pub async fn acquire(&self, id: &SessionId) -> SessionLock {
        let mutex = Arc::clone(
            self.locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let guard = mutex.lock_owned().await;
        debug!("Acquired session lock: {}", id);

        SessionLock {
            id: id.clone(),
            guard: Some(guard),
            table: Some(self.clone()),
            file: None,
        }
    }

    /// Whether a cycle currently holds the identifier's lock
    pub fn is_locked(&self, id: &str) -> bool {
        self.locks
            .get(id)
            .map(|mutex| mutex.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of identifiers with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop the entry of an identifier nobody holds or waits for
    fn prune(&self, id: &str) {
        self.locks
            .remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Build the handler selected by the configuration
pub fn build_handler(config: &SessionConfig) -> Result<Arc<dyn SessionHandler>> {
    let handler: Arc<dyn SessionHandler> = match config.driver {
        SessionDriver::File => Arc::new(FileHandler::from_config(config)?),
        SessionDriver::Memory => Arc::new(MemoryHandler::new()),
    };

    info!("Using {} session handler", handler.name());
    Ok(handler)
}
