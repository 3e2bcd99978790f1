use crate::clock::{Clock, SystemClock};
use crate::handler::{LockTable, SessionHandler, SessionLock};
use crate::session::types::{Result, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
struct StoredRecord {
    payload: Vec<u8>,
    last_activity: DateTime<Utc>,
}

/// Process-local handler keeping records in a concurrent map
pub struct MemoryHandler {
    records: DashMap<String, StoredRecord>,
    locks: LockTable,
    clock: Arc<dyn Clock>,
}

impl MemoryHandler {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use a custom time source for activity tracking and gc
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            locks: LockTable::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionHandler for MemoryHandler {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, id: &SessionId) -> Result<SessionLock> {
        Ok(self.locks.acquire(id).await)
    }

    async fn read(&self, id: &SessionId) -> Result<Option<Vec<u8>>> {
        Ok(self
            .records
            .get(id.as_str())
            .map(|record| record.payload.clone()))
    }

    async fn write(&self, id: &SessionId, payload: &[u8]) -> Result<()> {
        self.records.insert(
            id.to_string(),
            StoredRecord {
                payload: payload.to_vec(),
                last_activity: self.clock.now(),
            },
        );
        Ok(())
    }

    async fn exists(&self, id: &SessionId) -> Result<bool> {
        Ok(self.records.contains_key(id.as_str()))
    }

    async fn destroy(&self, id: &SessionId) -> Result<()> {
        self.records.remove(id.as_str());
        Ok(())
    }

    async fn gc(&self, max_lifetime: Duration) -> Result<usize> {
        let lifetime = chrono::Duration::from_std(max_lifetime).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        let before = self.records.len();

        self.records.retain(|id, record| {
            self.locks.is_locked(id)
                || now.signed_duration_since(record.last_activity) <= lifetime
        });

        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            info!("Garbage collected {} expired session records", purged);
        }
        Ok(purged)
    }

    async fn ids(&self) -> Result<Vec<SessionId>> {
        let mut ids: Vec<SessionId> = self
            .records
            .iter()
            .filter_map(|entry| SessionId::parse(entry.key()))
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}
