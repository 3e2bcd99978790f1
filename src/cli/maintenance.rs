//! Out-of-band operations on a session store.

use crate::clock::{Clock, SystemClock};
use crate::handler::{SessionHandler, build_handler};
use crate::session::{SessionConfig, SessionId, SessionStore, SessionSummary};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Contents of one stored record as shown by `inspect`
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub session_id: String,
    pub summary: SessionSummary,
    pub data: BTreeMap<String, Value>,
}

/// Maintenance operations against the handler a configuration selects
pub struct Maintenance {
    config: SessionConfig,
    handler: Arc<dyn SessionHandler>,
    clock: Arc<dyn Clock>,
}

impl Maintenance {
    pub fn from_config(config: SessionConfig) -> Result<Self> {
        let handler = build_handler(&config).context("Failed to open session storage")?;
        Ok(Self::new(config, handler, Arc::new(SystemClock)))
    }

    pub fn new(config: SessionConfig, handler: Arc<dyn SessionHandler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            handler,
            clock,
        }
    }

    /// Purge inactive records; `max_lifetime` overrides the configured expiration
    pub async fn gc(&self, max_lifetime: Option<Duration>) -> Result<usize> {
        let lifetime = max_lifetime.unwrap_or_else(|| self.config.max_lifetime());
        info!("Running session gc with lifetime of {}s", lifetime.as_secs());

        self.handler
            .gc(lifetime)
            .await
            .context("Session garbage collection failed")
    }

    pub async fn list(&self) -> Result<Vec<SessionId>> {
        self.handler
            .ids()
            .await
            .context("Failed to list session records")
    }

    /// Decode one record; `None` when it does not exist.
    ///
    /// Waits while a running cycle holds the record.
    pub async fn inspect(&self, id: &SessionId) -> Result<Option<RecordReport>> {
        let lock = self.handler.open(id).await?;
        let payload = self.handler.read(id).await;
        self.handler.close(lock).await?;

        let Some(payload) = payload.context("Failed to read session record")? else {
            return Ok(None);
        };

        let store = SessionStore::from_bytes(&payload).context("Session record is corrupt")?;

        Ok(Some(RecordReport {
            session_id: id.to_string(),
            summary: SessionSummary::of(&store, self.clock.now()),
            data: store.snapshot().into_iter().collect(),
        }))
    }

    /// Delete one record; returns whether it existed.
    ///
    /// Waits while a running cycle holds the record.
    pub async fn destroy(&self, id: &SessionId) -> Result<bool> {
        let lock = self.handler.open(id).await?;
        let existed = self.handler.exists(id).await?;
        if existed {
            self.handler
                .destroy(id)
                .await
                .context("Failed to destroy session record")?;
        }
        self.handler.close(lock).await?;
        Ok(existed)
    }
}
