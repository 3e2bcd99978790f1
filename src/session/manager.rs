use crate::clock::{Clock, SystemClock};
use crate::handler::{SessionHandler, SessionLock, build_handler};
use crate::session::config::SessionConfig;
use crate::session::cookie::SessionCookie;
use crate::session::flash::FlashDataTracker;
use crate::session::identity::*;
use crate::session::store::SessionStore;
use crate::session::temp::TempDataTracker;
use crate::session::types::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Session façade for one client, driven one request cycle at a time.
///
/// A cycle runs from [`start`](Self::start) to [`close`](Self::close). The
/// handler lock taken by `start` is held for the whole cycle and released by
/// `close`, by `destroy`, or when the manager is dropped.
///
/// Writes are only accepted inside a running cycle. Outside one they are
/// ignored with a warning (`set_serialized` returns
/// [`SessionError::NotStarted`]) because the next `start` replaces the store
/// with the persisted record. Reads outside a cycle see the last cycle's data.
pub struct SessionManager {
    config: SessionConfig,
    handler: Arc<dyn SessionHandler>,
    clock: Arc<dyn Clock>,
    identity: IdentityManager,
    store: SessionStore,
    lock: Option<SessionLock>,
    cycle: Option<CycleInfo>,
    cookie: Option<SessionCookie>,
}

#[derive(Debug, Clone, Copy)]
struct CycleInfo {
    is_new: bool,
    regenerated: bool,
    persistent: bool,
}

/// Result of starting a cycle
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub session_id: SessionId,
    /// No stored session was resumed
    pub is_new: bool,
    /// The identifier rotated during this start
    pub regenerated: bool,
    /// False when storage failed and the cycle runs in memory only
    pub persistent: bool,
    /// Cookie the transport layer should send back
    pub cookie: SessionCookie,
}

/// Point-in-time view of a session's contents
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub keys: Vec<String>,
    pub flash_keys: Vec<String>,
    pub temp_keys: Vec<String>,
    pub last_regenerate: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SessionSummary {
    pub fn of(store: &SessionStore, now: DateTime<Utc>) -> Self {
        let mut keys: Vec<String> = store.snapshot().into_keys().collect();
        keys.sort();

        Self {
            keys,
            flash_keys: FlashDataTracker::keys(store).map(str::to_string).collect(),
            temp_keys: TempDataTracker::keys(store, now).map(str::to_string).collect(),
            last_regenerate: store.last_regenerate(),
            ip_address: store.ip_address().map(str::to_string),
            user_agent: store.user_agent().map(str::to_string),
        }
    }
}

enum Loaded {
    Resumed(SessionId, SessionLock, SessionStore),
    Fresh(SessionId, SessionLock),
}

impl SessionManager {
    /// Create a manager over an existing handler using the system clock
    pub fn new(config: SessionConfig, handler: Arc<dyn SessionHandler>) -> Self {
        Self::with_clock(config, handler, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit time source
    pub fn with_clock(
        config: SessionConfig,
        handler: Arc<dyn SessionHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let identity = IdentityManager::new(RegenerationPolicy::from_config(&config));
        Self {
            config,
            handler,
            clock,
            identity,
            store: SessionStore::default(),
            lock: None,
            cycle: None,
            cookie: None,
        }
    }

    /// Validate the configuration and build the handler it selects
    pub fn from_config(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let handler = build_handler(&config)?;
        Ok(Self::new(config, handler))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn SessionHandler> {
        &self.handler
    }

    /// Begin a request cycle.
    ///
    /// Calling `start` again before `close` returns the running cycle's
    /// outcome without reloading anything.
    pub async fn start(&mut self, request: &RequestContext) -> Result<StartOutcome> {
        if self.cycle.is_some() {
            debug!("Session cycle already started");
            return self.outcome();
        }

        let now = self.clock.now();

        let mut cycle = match self.load(request).await {
            Ok(loaded) => {
                let is_new = matches!(loaded, Loaded::Fresh(..));
                let (id, lock) = match loaded {
                    Loaded::Resumed(id, lock, store) => {
                        self.store = store;
                        (id, lock)
                    }
                    Loaded::Fresh(id, lock) => {
                        self.store = SessionStore::fresh(now);
                        self.identity.bind(&mut self.store, request);
                        (id, lock)
                    }
                };
                self.lock = Some(lock);
                self.identity.activate(id);
                CycleInfo {
                    is_new,
                    regenerated: false,
                    persistent: true,
                }
            }
            Err(e @ SessionError::IdentifierExhausted { .. }) => {
                error!("Cannot start session: {}", e);
                return Err(e);
            }
            Err(e) => {
                warn!("Session storage unavailable, continuing without persistence: {}", e);
                self.store = SessionStore::fresh(now);
                self.identity.bind(&mut self.store, request);
                self.identity.activate(SessionId::generate());
                CycleInfo {
                    is_new: true,
                    regenerated: false,
                    persistent: false,
                }
            }
        };

        if self.store.last_regenerate().is_none() {
            self.store.set_last_regenerate(now);
        }
        self.cycle = Some(cycle);

        if cycle.persistent && !cycle.is_new && self.identity.should_regenerate(&self.store, now) {
            let destroy_old = self.identity.policy().destroy_old;
            match self.regenerate(destroy_old).await {
                Ok(()) => cycle.regenerated = true,
                Err(e @ SessionError::IdentifierExhausted { .. }) => {
                    self.abandon();
                    return Err(e);
                }
                Err(e) => warn!("Session regeneration failed, keeping identifier: {}", e),
            }
        }

        FlashDataTracker::age(&mut self.store);
        TempDataTracker::sweep(&mut self.store, now);

        if let Some(id) = self.identity.current() {
            self.cookie = Some(SessionCookie::issue(&self.config, id.as_str(), now));
        }

        debug!(
            "Session cycle started (new: {}, regenerated: {}, persistent: {})",
            cycle.is_new, cycle.regenerated, cycle.persistent
        );

        self.outcome()
    }

    /// Resolve the identifier and load its record under the handler lock
    async fn load(&self, request: &RequestContext) -> Result<Loaded> {
        if let Some(id) = self.identity.resolve(request) {
            let lock = self.handler.open(&id).await?;

            match self.handler.read(&id).await? {
                Some(payload) => match SessionStore::from_bytes(&payload) {
                    Ok(store) => match self.identity.check_binding(&store, request) {
                        None => return Ok(Loaded::Resumed(id, lock, store)),
                        Some(mismatch) => {
                            warn!("Session failed {:?} binding check, starting over", mismatch);
                            if let Err(e) = self.handler.destroy(&id).await {
                                warn!("Failed to destroy rejected session: {}", e);
                            }
                            self.handler.close(lock).await?;
                        }
                    },
                    Err(e) => {
                        warn!("Discarding unreadable session record: {}", e);
                        return Ok(Loaded::Fresh(id, lock));
                    }
                },
                None => {
                    debug!("Inbound session has no stored record, issuing a new identifier");
                    self.handler.close(lock).await?;
                }
            }
        }

        let id = self.identity.allocate(self.handler.as_ref()).await?;
        let lock = self.handler.open(&id).await?;
        info!("Created new session");
        Ok(Loaded::Fresh(id, lock))
    }

    fn outcome(&self) -> Result<StartOutcome> {
        let (Some(cycle), Some(id)) = (self.cycle, self.identity.current()) else {
            return Err(SessionError::NotStarted);
        };

        Ok(StartOutcome {
            session_id: id.clone(),
            is_new: cycle.is_new,
            regenerated: cycle.regenerated,
            persistent: cycle.persistent,
            cookie: self
                .cookie
                .clone()
                .unwrap_or_else(|| SessionCookie::issue(&self.config, id.as_str(), self.clock.now())),
        })
    }

    /// Drop the running cycle without persisting it
    fn abandon(&mut self) {
        self.lock = None;
        self.cycle = None;
    }

    /// Rotate the identifier now, carrying the session data over.
    ///
    /// With `destroy_old` the previous record is deleted immediately;
    /// otherwise it is left for gc so in-flight requests holding the old
    /// identifier keep working.
    pub async fn regenerate(&mut self, destroy_old: bool) -> Result<()> {
        if self.cycle.is_none() {
            return Err(SessionError::NotStarted);
        }
        let now = self.clock.now();
        let persistent = self.cycle.is_some_and(|cycle| cycle.persistent);
        let old = self.identity.current().cloned();

        self.identity.begin_regeneration();

        let new_id = if persistent {
            let allocated = self.identity.allocate(self.handler.as_ref()).await;
            let opened = match allocated {
                Ok(id) => self.handler.open(&id).await.map(|lock| (id, lock)),
                Err(e) => Err(e),
            };

            let (id, lock) = match opened {
                Ok(pair) => pair,
                Err(e) => {
                    if let Some(old) = old {
                        self.identity.activate(old);
                    }
                    return Err(e);
                }
            };

            if let Some(old) = &old
                && destroy_old
                && let Err(e) = self.handler.destroy(old).await
            {
                warn!("Failed to destroy previous session record: {}", e);
            }

            if let Some(old_lock) = self.lock.replace(lock)
                && let Err(e) = self.handler.close(old_lock).await
            {
                warn!("Failed to release previous session lock: {}", e);
            }

            id
        } else {
            SessionId::generate()
        };

        self.store.set_last_regenerate(now);
        self.cookie = Some(SessionCookie::issue(&self.config, new_id.as_str(), now));
        self.identity.activate(new_id);
        if let Some(cycle) = self.cycle.as_mut() {
            cycle.regenerated = true;
        }

        info!(
            "Session identifier regenerated (previous record {})",
            if destroy_old { "destroyed" } else { "left to expire" }
        );
        Ok(())
    }

    /// End the cycle: persist the record and release the handler lock.
    ///
    /// The lock is released even when persisting fails.
    pub async fn close(&mut self) -> Result<()> {
        let Some(cycle) = self.cycle.take() else {
            return Err(SessionError::NotStarted);
        };
        let lock = self.lock.take();

        let result = match self.identity.current() {
            Some(id) if cycle.persistent => match self.store.to_bytes() {
                Ok(payload) => self.handler.write(id, &payload).await,
                Err(e) => Err(e),
            },
            _ => Err(SessionError::Unavailable(
                "session storage was unavailable for this cycle".to_string(),
            )),
        };

        if let Some(lock) = lock
            && let Err(e) = self.handler.close(lock).await
        {
            warn!("Failed to release session lock: {}", e);
        }

        match &result {
            Ok(()) => debug!("Session cycle closed"),
            Err(e) => error!("Failed to persist session: {}", e),
        }
        result
    }

    /// Delete the session everywhere. The next `start` issues a new identifier.
    ///
    /// Storage failures are logged, not returned.
    pub async fn destroy(&mut self) {
        if let Some(id) = self.identity.current().cloned()
            && let Err(e) = self.handler.destroy(&id).await
        {
            warn!("Failed to destroy session record: {}", e);
        }

        if let Some(lock) = self.lock.take()
            && let Err(e) = self.handler.close(lock).await
        {
            warn!("Failed to release session lock: {}", e);
        }

        self.store.clear();
        self.identity.reset();
        self.cycle = None;
        self.cookie = Some(SessionCookie::expired(&self.config));
        info!("Session destroyed");
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.identity.current()
    }

    pub fn identity_state(&self) -> IdentityState {
        self.identity.state()
    }

    pub fn is_started(&self) -> bool {
        self.cycle.is_some()
    }

    /// Whether this cycle's changes will be written back
    pub fn is_persistent(&self) -> bool {
        self.cycle.is_some_and(|cycle| cycle.persistent)
    }

    /// Whether the identifier rotated during the current cycle
    pub fn did_regenerate(&self) -> bool {
        self.cycle.is_some_and(|cycle| cycle.regenerated)
    }

    /// Cookie the transport layer should emit, if any
    pub fn cookie(&self) -> Option<&SessionCookie> {
        self.cookie.as_ref()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary::of(&self.store, self.clock.now())
    }

    pub fn marker(&self, key: &str) -> Option<Marker> {
        self.store.marker(key)
    }

    /// Store for mutation, or `None` outside a running cycle
    fn writable(&mut self, operation: &str) -> Option<&mut SessionStore> {
        if self.cycle.is_none() {
            warn!("Ignoring {} outside a running session cycle", operation);
            return None;
        }
        Some(&mut self.store)
    }

    // Plain data

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(store) = self.writable("set") {
            store.set(key, value.into());
        }
    }

    pub fn set_many<K, V, I>(&mut self, entries: I)
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        if let Some(store) = self.writable("set_many") {
            for (key, value) in entries {
                store.set(key, value.into());
            }
        }
    }

    /// Store any serializable value
    pub fn set_serialized<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let store = self.writable("set_serialized").ok_or(SessionError::NotStarted)?;
        store.set(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    /// Read a value back into a concrete type
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key) {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    /// Snapshot of all session data, flash and temp values included
    pub fn get_all(&self) -> HashMap<String, Value> {
        self.store.snapshot()
    }

    pub fn has(&self, key: &str) -> bool {
        self.store.has(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.writable("remove")?.remove(key)
    }

    pub fn remove_many<S: AsRef<str>>(&mut self, keys: &[S]) {
        if let Some(store) = self.writable("remove_many") {
            for key in keys {
                store.remove(key.as_ref());
            }
        }
    }

    // Flash data

    pub fn set_flashdata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(store) = self.writable("set_flashdata") {
            FlashDataTracker::set(store, key, value.into());
        }
    }

    pub fn set_flashdata_many<K, V, I>(&mut self, entries: I)
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        if let Some(store) = self.writable("set_flashdata_many") {
            FlashDataTracker::set_many(
                store,
                entries.into_iter().map(|(key, value)| (key, value.into())),
            );
        }
    }

    pub fn mark_as_flashdata<S: AsRef<str>>(&mut self, keys: &[S]) -> bool {
        self.writable("mark_as_flashdata")
            .is_some_and(|store| FlashDataTracker::mark(store, keys))
    }

    pub fn keep_flashdata<S: AsRef<str>>(&mut self, keys: &[S]) -> bool {
        self.writable("keep_flashdata")
            .is_some_and(|store| FlashDataTracker::keep(store, keys))
    }

    pub fn unmark_flashdata<S: AsRef<str>>(&mut self, keys: &[S]) {
        if let Some(store) = self.writable("unmark_flashdata") {
            FlashDataTracker::unmark(store, keys);
        }
    }

    pub fn get_flashdata(&self, key: &str) -> Option<&Value> {
        FlashDataTracker::get(&self.store, key)
    }

    pub fn get_all_flashdata(&self) -> HashMap<String, Value> {
        FlashDataTracker::get_all(&self.store)
    }

    pub fn flash_keys(&self) -> impl Iterator<Item = &str> + Clone {
        FlashDataTracker::keys(&self.store)
    }

    // Temp data

    pub fn set_tempdata(&mut self, key: impl Into<String>, value: impl Into<Value>, ttl_secs: i64) {
        let now = self.clock.now();
        if let Some(store) = self.writable("set_tempdata") {
            TempDataTracker::set(store, key, value.into(), ttl_secs, now);
        }
    }

    pub fn set_tempdata_many<K, V, I>(&mut self, entries: I, ttl_secs: i64)
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let now = self.clock.now();
        if let Some(store) = self.writable("set_tempdata_many") {
            TempDataTracker::set_many(
                store,
                entries.into_iter().map(|(key, value)| (key, value.into())),
                ttl_secs,
                now,
            );
        }
    }

    pub fn set_tempdata_each<K, V, I>(&mut self, entries: I)
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V, i64)>,
    {
        let now = self.clock.now();
        if let Some(store) = self.writable("set_tempdata_each") {
            TempDataTracker::set_each(
                store,
                entries
                    .into_iter()
                    .map(|(key, value, ttl_secs)| (key, value.into(), ttl_secs)),
                now,
            );
        }
    }

    pub fn mark_as_tempdata<S: AsRef<str>>(&mut self, keys: &[S], ttl_secs: i64) -> bool {
        let now = self.clock.now();
        self.writable("mark_as_tempdata")
            .is_some_and(|store| TempDataTracker::mark(store, keys, ttl_secs, now))
    }

    pub fn mark_as_tempdata_each<K, I>(&mut self, ttls: I) -> bool
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, i64)>,
    {
        let now = self.clock.now();
        self.writable("mark_as_tempdata_each")
            .is_some_and(|store| TempDataTracker::mark_each(store, ttls, now))
    }

    pub fn get_tempdata(&self, key: &str) -> Option<&Value> {
        TempDataTracker::get(&self.store, key, self.clock.now())
    }

    pub fn get_all_tempdata(&self) -> HashMap<String, Value> {
        TempDataTracker::get_all(&self.store, self.clock.now())
    }

    pub fn temp_keys(&self) -> impl Iterator<Item = &str> + Clone {
        TempDataTracker::keys(&self.store, self.clock.now())
    }

    pub fn remove_tempdata(&mut self, key: &str) -> Option<Value> {
        TempDataTracker::remove(self.writable("remove_tempdata")?, key)
    }

    pub fn unmark_tempdata<S: AsRef<str>>(&mut self, keys: &[S]) {
        if let Some(store) = self.writable("unmark_tempdata") {
            TempDataTracker::unmark(store, keys);
        }
    }
}
