use crate::session::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Session state for one request cycle.
///
/// The data mapping and the marker list are kept apart so a value can never
/// be confused with its lifecycle marker. Markers keep the order in which
/// keys were first marked. This struct is also the persisted record: the
/// handler stores exactly its JSON form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStore {
    #[serde(default)]
    data: HashMap<String, Value>,
    #[serde(default)]
    vars: Vec<(String, Marker)>,
    #[serde(default)]
    last_regenerate: Option<DateTime<Utc>>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
}

impl SessionStore {
    /// Create an empty store whose rotation timer starts at `now`
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            last_regenerate: Some(now),
            ..Self::default()
        }
    }

    /// Decode a persisted record
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let mut store: SessionStore = serde_json::from_slice(payload)?;
        store.drop_orphan_markers();
        Ok(store)
    }

    /// Encode the record for the handler
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Snapshot of the data mapping, markers excluded
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.data.clone()
    }

    /// Write a permanent value, discarding any marker on the key
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.clear_marker(&key);
        self.data.insert(key, value);
    }

    /// Write a value and leave its marker untouched
    pub(crate) fn put(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Remove a value together with its marker
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.clear_marker(key);
        self.data.remove(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn marker(&self, key: &str) -> Option<Marker> {
        self.vars
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, marker)| *marker)
    }

    /// Attach a marker to an existing key.
    ///
    /// Returns false when the key holds no value. Re-marking keeps the key's
    /// original position in the marker order.
    pub fn set_marker(&mut self, key: &str, marker: Marker) -> bool {
        if !self.data.contains_key(key) {
            return false;
        }

        match self.vars.iter_mut().find(|(name, _)| name == key) {
            Some(entry) => entry.1 = marker,
            None => self.vars.push((key.to_string(), marker)),
        }
        true
    }

    pub fn clear_marker(&mut self, key: &str) -> Option<Marker> {
        let position = self.vars.iter().position(|(name, _)| name == key)?;
        Some(self.vars.remove(position).1)
    }

    /// Marked keys in marking order
    pub fn markers(&self) -> impl Iterator<Item = (&str, Marker)> + Clone {
        self.vars.iter().map(|(name, marker)| (name.as_str(), *marker))
    }

    pub fn has_markers(&self) -> bool {
        !self.vars.is_empty()
    }

    /// Keep only the markers for which `keep` returns true, deleting the values
    /// of the others. Returns the deleted keys.
    pub(crate) fn retain_marked(&mut self, mut keep: impl FnMut(&Marker) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        let data = &mut self.data;
        self.vars.retain(|(name, marker)| {
            if keep(marker) {
                true
            } else {
                data.remove(name);
                removed.push(name.clone());
                false
            }
        });
        removed
    }

    /// Rewrite markers in place
    pub(crate) fn update_markers(&mut self, mut update: impl FnMut(&mut Marker)) {
        for (_, marker) in self.vars.iter_mut() {
            update(marker);
        }
    }

    pub fn last_regenerate(&self) -> Option<DateTime<Utc>> {
        self.last_regenerate
    }

    pub fn set_last_regenerate(&mut self, at: DateTime<Utc>) {
        self.last_regenerate = Some(at);
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub(crate) fn bind(&mut self, ip_address: Option<String>, user_agent: Option<String>) {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
    }

    /// Forget everything, including rotation tracking
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Markers whose key lost its value break the store invariant; drop them
    fn drop_orphan_markers(&mut self) {
        let data = &self.data;
        self.vars.retain(|(name, _)| data.contains_key(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_clears_marker() {
        let mut store = SessionStore::default();
        store.set("foo", json!("bar"));
        assert!(store.set_marker("foo", Marker::FlashNew));

        store.set("foo", json!("baz"));

        assert_eq!(store.get("foo"), Some(&json!("baz")));
        assert_eq!(store.marker("foo"), None);
        assert!(!store.has_markers());
    }

    #[test]
    fn test_marker_requires_value() {
        let mut store = SessionStore::default();
        assert!(!store.set_marker("missing", Marker::FlashNew));
        assert!(!store.has_markers());
    }

    #[test]
    fn test_remarking_keeps_order() {
        let mut store = SessionStore::default();
        for key in ["a", "b", "c"] {
            store.set(key, json!(1));
            store.set_marker(key, Marker::FlashNew);
        }

        store.set_marker("a", Marker::FlashOld);

        let keys: Vec<&str> = store.markers().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(store.marker("a"), Some(Marker::FlashOld));
    }

    #[test]
    fn test_remove_drops_value_and_marker() {
        let mut store = SessionStore::default();
        store.set("foo", json!("bar"));
        store.set_marker("foo", Marker::FlashNew);

        assert_eq!(store.remove("foo"), Some(json!("bar")));
        assert!(!store.has("foo"));
        assert_eq!(store.marker("foo"), None);
    }

    #[test]
    fn test_record_survives_encoding() {
        let now = Utc::now();
        let mut store = SessionStore::fresh(now);
        store.set("user", json!({"id": 7, "name": "ada"}));
        store.set("notice", json!("saved"));
        store.set_marker("notice", Marker::TempUntil(now));
        store.bind(Some("10.0.0.1".to_string()), None);

        let decoded = SessionStore::from_bytes(&store.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded, store);
    }

    #[test]
    fn test_orphan_markers_are_dropped_on_decode() {
        let payload = br#"{"data":{"a":1},"vars":[["a","FlashNew"],["ghost","FlashOld"]]}"#;

        let store = SessionStore::from_bytes(payload).unwrap();

        assert_eq!(store.marker("a"), Some(Marker::FlashNew));
        assert_eq!(store.marker("ghost"), None);
        assert!(store.last_regenerate().is_none());
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        assert!(matches!(
            SessionStore::from_bytes(b"not json"),
            Err(SessionError::Serialization(_))
        ));
    }
}
