//! Temp data: values that stay visible until an absolute expiry instant.

use crate::clock::{bounded_secs, offset_secs};
use crate::session::store::SessionStore;
use crate::session::types::Marker;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Marks and sweeps time-limited entries of a [`SessionStore`]
pub struct TempDataTracker;

impl TempDataTracker {
    /// Write a value that expires `ttl_secs` seconds after `now`
    pub fn set(
        store: &mut SessionStore,
        key: impl Into<String>,
        value: Value,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) {
        let key = key.into();
        store.put(key.clone(), value);
        store.set_marker(&key, Marker::TempUntil(expiry(now, ttl_secs)));
    }

    /// Write several values sharing one TTL
    pub fn set_many<K, I>(store: &mut SessionStore, entries: I, ttl_secs: i64, now: DateTime<Utc>)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (key, value) in entries {
            Self::set(store, key, value, ttl_secs, now);
        }
    }

    /// Write several values, each with its own TTL
    pub fn set_each<K, I>(store: &mut SessionStore, entries: I, now: DateTime<Utc>)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value, i64)>,
    {
        for (key, value, ttl_secs) in entries {
            Self::set(store, key, value, ttl_secs, now);
        }
    }

    /// Mark existing values with one shared TTL.
    ///
    /// Fails without marking anything when one of the keys holds no value.
    pub fn mark<S: AsRef<str>>(
        store: &mut SessionStore,
        keys: &[S],
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> bool {
        if keys.iter().any(|key| !store.has(key.as_ref())) {
            return false;
        }

        let until = expiry(now, ttl_secs);
        for key in keys {
            store.set_marker(key.as_ref(), Marker::TempUntil(until));
        }
        true
    }

    /// Mark existing values with per-key TTLs
    pub fn mark_each<K, I>(store: &mut SessionStore, ttls: I, now: DateTime<Utc>) -> bool
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, i64)>,
    {
        let ttls: Vec<(K, i64)> = ttls.into_iter().collect();
        if ttls.iter().any(|(key, _)| !store.has(key.as_ref())) {
            return false;
        }

        for (key, ttl_secs) in &ttls {
            store.set_marker(key.as_ref(), Marker::TempUntil(expiry(now, *ttl_secs)));
        }
        true
    }

    /// Read a temp value that has not expired yet
    pub fn get<'a>(store: &'a SessionStore, key: &str, now: DateTime<Utc>) -> Option<&'a Value> {
        match store.marker(key) {
            Some(Marker::TempUntil(until)) if now < until => store.get(key),
            _ => None,
        }
    }

    /// Snapshot of every live temp value
    pub fn get_all(store: &SessionStore, now: DateTime<Utc>) -> HashMap<String, Value> {
        Self::keys(store, now)
            .filter_map(|key| store.get(key).map(|value| (key.to_string(), value.clone())))
            .collect()
    }

    /// Live temp keys in the order they were marked.
    ///
    /// The iterator is lazy and can be cloned to walk the keys again.
    pub fn keys(store: &SessionStore, now: DateTime<Utc>) -> impl Iterator<Item = &str> + Clone {
        store.markers().filter_map(move |(key, marker)| match marker {
            Marker::TempUntil(until) if now < until => Some(key),
            _ => None,
        })
    }

    /// Delete a temp value and its marker. Permanent and flash values are left alone.
    pub fn remove(store: &mut SessionStore, key: &str) -> Option<Value> {
        if store.marker(key).is_some_and(|marker| marker.is_temp()) {
            store.remove(key)
        } else {
            None
        }
    }

    /// Turn temp values into permanent data
    pub fn unmark<S: AsRef<str>>(store: &mut SessionStore, keys: &[S]) {
        for key in keys {
            let key = key.as_ref();
            if store.marker(key).is_some_and(|marker| marker.is_temp()) {
                store.clear_marker(key);
            }
        }
    }

    /// Delete every temp value whose expiry is at or before `now`
    pub fn sweep(store: &mut SessionStore, now: DateTime<Utc>) -> Vec<String> {
        let expired = store.retain_marked(|marker| match marker {
            Marker::TempUntil(until) => now < *until,
            _ => true,
        });

        if !expired.is_empty() {
            debug!("Temp sweep removed {} expired entries", expired.len());
        }

        expired
    }
}

fn expiry(now: DateTime<Utc>, ttl_secs: i64) -> DateTime<Utc> {
    offset_secs(now, bounded_secs(ttl_secs))
}
