//! Flash data: values visible during the cycle that sets them and the
//! immediately following cycle, then removed.

use crate::session::store::SessionStore;
use crate::session::types::Marker;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of one aging pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlashAging {
    /// Keys deleted because they had already been carried into a later cycle
    pub expired: Vec<String>,
    /// Keys that became eligible for deletion on the next pass
    pub carried: usize,
}

/// Marks and ages one-cycle-visible entries of a [`SessionStore`]
pub struct FlashDataTracker;

impl FlashDataTracker {
    /// Write a value and mark it as fresh flash data
    pub fn set(store: &mut SessionStore, key: impl Into<String>, value: Value) {
        let key = key.into();
        store.put(key.clone(), value);
        store.set_marker(&key, Marker::FlashNew);
    }

    /// Write several values and mark all of them as flash data
    pub fn set_many<K, I>(store: &mut SessionStore, entries: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (key, value) in entries {
            Self::set(store, key, value);
        }
    }

    /// Mark existing values as fresh flash data.
    ///
    /// Fails without marking anything when one of the keys holds no value.
    pub fn mark<S: AsRef<str>>(store: &mut SessionStore, keys: &[S]) -> bool {
        if keys.iter().any(|key| !store.has(key.as_ref())) {
            return false;
        }

        for key in keys {
            store.set_marker(key.as_ref(), Marker::FlashNew);
        }
        true
    }

    /// Extend visibility of flash values by one more cycle
    pub fn keep<S: AsRef<str>>(store: &mut SessionStore, keys: &[S]) -> bool {
        Self::mark(store, keys)
    }

    /// Turn flash values into permanent data
    pub fn unmark<S: AsRef<str>>(store: &mut SessionStore, keys: &[S]) {
        for key in keys {
            let key = key.as_ref();
            if store.marker(key).is_some_and(|marker| marker.is_flash()) {
                store.clear_marker(key);
            }
        }
    }

    /// Read a value only if it is flash data
    pub fn get<'a>(store: &'a SessionStore, key: &str) -> Option<&'a Value> {
        match store.marker(key) {
            Some(marker) if marker.is_flash() => store.get(key),
            _ => None,
        }
    }

    /// Snapshot of every flash value
    pub fn get_all(store: &SessionStore) -> HashMap<String, Value> {
        Self::keys(store)
            .filter_map(|key| store.get(key).map(|value| (key.to_string(), value.clone())))
            .collect()
    }

    /// Keys currently carrying a flash marker, in marking order.
    ///
    /// The iterator is lazy and can be cloned to walk the keys again.
    pub fn keys(store: &SessionStore) -> impl Iterator<Item = &str> + Clone {
        store
            .markers()
            .filter(|(_, marker)| marker.is_flash())
            .map(|(key, _)| key)
    }

    /// Age markers at the start of a cycle: old entries are deleted, new ones
    /// become old.
    pub fn age(store: &mut SessionStore) -> FlashAging {
        let expired = store.retain_marked(|marker| *marker != Marker::FlashOld);

        let mut carried = 0;
        store.update_markers(|marker| {
            if *marker == Marker::FlashNew {
                *marker = Marker::FlashOld;
                carried += 1;
            }
        });

        if !expired.is_empty() || carried > 0 {
            debug!(
                "Flash aging: {} expired, {} carried to next cycle",
                expired.len(),
                carried
            );
        }

        FlashAging { expired, carried }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_two_aging_passes_remove_flash_value() {
        let mut store = SessionStore::default();
        FlashDataTracker::set(&mut store, "foo", json!("bar"));
        assert_eq!(store.marker("foo"), Some(Marker::FlashNew));

        let first = FlashDataTracker::age(&mut store);
        assert_eq!(first.carried, 1);
        assert!(first.expired.is_empty());
        assert_eq!(store.marker("foo"), Some(Marker::FlashOld));
        assert!(store.has("foo"));

        let second = FlashDataTracker::age(&mut store);
        assert_eq!(second.expired, vec!["foo".to_string()]);
        assert!(!store.has("foo"));
        assert_eq!(store.marker("foo"), None);
    }

    #[test]
    fn test_aging_ignores_permanent_and_temp_values() {
        let mut store = SessionStore::default();
        store.set("plain", json!(1));
        store.set("temp", json!(2));
        store.set_marker("temp", Marker::TempUntil(chrono::Utc::now()));

        FlashDataTracker::age(&mut store);
        FlashDataTracker::age(&mut store);

        assert!(store.has("plain"));
        assert!(store.has("temp"));
        assert!(store.marker("temp").is_some_and(|m| m.is_temp()));
    }

    #[test]
    fn test_mark_fails_atomically_on_missing_key() {
        let mut store = SessionStore::default();
        store.set("foo", json!("bar"));

        assert!(!FlashDataTracker::mark(&mut store, &["foo", "missing"]));
        assert_eq!(store.marker("foo"), None);

        assert!(FlashDataTracker::mark(&mut store, &["foo"]));
        assert_eq!(store.marker("foo"), Some(Marker::FlashNew));
    }

    #[test]
    fn test_unmark_leaves_temp_markers_alone() {
        let mut store = SessionStore::default();
        store.set("temp", json!(2));
        let until = chrono::Utc::now();
        store.set_marker("temp", Marker::TempUntil(until));

        FlashDataTracker::unmark(&mut store, &["temp"]);

        assert_eq!(store.marker("temp"), Some(Marker::TempUntil(until)));
    }

    #[test]
    fn test_keys_iterator_is_restartable() {
        let mut store = SessionStore::default();
        FlashDataTracker::set_many(&mut store, [("a", json!(1)), ("b", json!(2))]);
        store.set("c", json!(3));

        let keys = FlashDataTracker::keys(&store);
        let first: Vec<&str> = keys.clone().collect();
        let second: Vec<&str> = keys.collect();

        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_get_only_returns_flash_values() {
        let mut store = SessionStore::default();
        FlashDataTracker::set(&mut store, "notice", json!("saved"));
        store.set("plain", json!("value"));

        assert_eq!(FlashDataTracker::get(&store, "notice"), Some(&json!("saved")));
        assert_eq!(FlashDataTracker::get(&store, "plain"), None);
        assert_eq!(FlashDataTracker::get_all(&store).len(), 1);
    }
}
