//! In-memory model store.
//!
//! Records live per `(namespace, channel)` scope. This is the reference
//! persistence layer: enough to answer sync requests and feed synced
//! broadcasts, not a database.

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tether_protocol::Method;
use thiserror::Error;

/// Atomic counter for unique record IDs within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique record ID.
#[must_use]
pub fn generate_record_id() -> u64 {
    // Combine timestamp with atomic counter for guaranteed uniqueness
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// Store errors.
///
/// These surface to clients as the error value of a sync acknowledgment.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Model payload was not an attribute object.
    #[error("Model must be an object")]
    NotAnObject,

    /// Update or delete referenced an identity with no record.
    #[error("No record with identity {0}")]
    NotFound(Value),

    /// Update or delete carried no identity attribute.
    #[error("Model has no identity attribute")]
    MissingId,
}

/// In-memory store of records per scope.
#[derive(Default)]
pub struct Store {
    scopes: DashMap<String, Vec<Map<String, Value>>>,
}

impl Store {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the scope key for a namespace and optional channel.
    #[must_use]
    pub fn scope_key(namespace: &str, channel: Option<&str>) -> String {
        match channel {
            Some(channel) => format!("{}#{}", namespace, channel),
            None => namespace.to_string(),
        }
    }

    /// Apply one persistence operation.
    ///
    /// Returns the resulting record (or record list for `read`); for
    /// mutations, the returned value is what the synced broadcast carries.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the model payload is malformed or the
    /// referenced record does not exist.
    pub fn apply(
        &self,
        scope: &str,
        id_attribute: &str,
        method: Method,
        model: &Value,
    ) -> Result<Value, StoreError> {
        match method {
            Method::Create => self.create(scope, id_attribute, model),
            Method::Read => Ok(self.read(scope)),
            Method::Update => self.update(scope, id_attribute, model),
            Method::Delete => self.delete(scope, id_attribute, model),
        }
    }

    fn create(&self, scope: &str, id_attribute: &str, model: &Value) -> Result<Value, StoreError> {
        let mut record = model.as_object().ok_or(StoreError::NotAnObject)?.clone();

        if !has_identity(&record, id_attribute) {
            record.insert(id_attribute.to_string(), Value::from(generate_record_id()));
        }

        self.scopes
            .entry(scope.to_string())
            .or_default()
            .push(record.clone());

        Ok(Value::Object(record))
    }

    fn read(&self, scope: &str) -> Value {
        let records = self
            .scopes
            .get(scope)
            .map(|records| records.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default();
        Value::Array(records)
    }

    fn update(&self, scope: &str, id_attribute: &str, model: &Value) -> Result<Value, StoreError> {
        let incoming = model.as_object().ok_or(StoreError::NotAnObject)?;
        let id = identity(incoming, id_attribute).ok_or(StoreError::MissingId)?;

        let mut records = self
            .scopes
            .get_mut(scope)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let record = records
            .iter_mut()
            .find(|record| identity(record, id_attribute).as_ref() == Some(&id))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        for (key, value) in incoming {
            record.insert(key.clone(), value.clone());
        }

        Ok(Value::Object(record.clone()))
    }

    fn delete(&self, scope: &str, id_attribute: &str, model: &Value) -> Result<Value, StoreError> {
        let incoming = model.as_object().ok_or(StoreError::NotAnObject)?;
        let id = identity(incoming, id_attribute).ok_or(StoreError::MissingId)?;

        let mut records = self
            .scopes
            .get_mut(scope)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let index = records
            .iter()
            .position(|record| identity(record, id_attribute).as_ref() == Some(&id))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let removed = records.remove(index);
        Ok(Value::Object(removed))
    }

    /// Number of records in a scope.
    #[must_use]
    pub fn record_count(&self, scope: &str) -> usize {
        self.scopes.get(scope).map_or(0, |records| records.len())
    }
}

fn identity(record: &Map<String, Value>, id_attribute: &str) -> Option<Value> {
    match record.get(id_attribute) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.clone()),
    }
}

fn has_identity(record: &Map<String, Value>, id_attribute: &str) -> bool {
    identity(record, id_attribute).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_assigns_identity_when_absent() {
        let store = Store::new();

        let created = store
            .apply("todos", "id", Method::Create, &json!({"name": "a"}))
            .unwrap();
        assert!(created.get("id").is_some());
        assert_eq!(created.get("name"), Some(&json!("a")));
        assert_eq!(store.record_count("todos"), 1);
    }

    #[test]
    fn test_create_keeps_given_identity() {
        let store = Store::new();

        let created = store
            .apply("todos", "id", Method::Create, &json!({"id": 7, "name": "a"}))
            .unwrap();
        assert_eq!(created.get("id"), Some(&json!(7)));
    }

    #[test]
    fn test_update_merges_by_identity() {
        let store = Store::new();
        store
            .apply("todos", "id", Method::Create, &json!({"id": 1, "name": "a", "done": false}))
            .unwrap();

        let updated = store
            .apply("todos", "id", Method::Update, &json!({"id": 1, "done": true}))
            .unwrap();
        assert_eq!(updated.get("done"), Some(&json!(true)));
        assert_eq!(updated.get("name"), Some(&json!("a")));
    }

    #[test]
    fn test_update_unknown_identity_errors() {
        let store = Store::new();
        store
            .apply("todos", "id", Method::Create, &json!({"id": 1}))
            .unwrap();

        match store.apply("todos", "id", Method::Update, &json!({"id": 9})) {
            Err(StoreError::NotFound(id)) => assert_eq!(id, json!(9)),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_removes_record() {
        let store = Store::new();
        store
            .apply("todos", "id", Method::Create, &json!({"id": 1, "name": "a"}))
            .unwrap();

        let removed = store
            .apply("todos", "id", Method::Delete, &json!({"id": 1}))
            .unwrap();
        assert_eq!(removed.get("name"), Some(&json!("a")));
        assert_eq!(store.record_count("todos"), 0);

        assert!(store
            .apply("todos", "id", Method::Delete, &json!({"id": 1}))
            .is_err());
    }

    #[test]
    fn test_read_lists_scope_records() {
        let store = Store::new();
        store
            .apply("todos#room-1", "id", Method::Create, &json!({"id": 1}))
            .unwrap();
        store
            .apply("todos#room-2", "id", Method::Create, &json!({"id": 2}))
            .unwrap();

        let listed = store.apply("todos#room-1", "id", Method::Read, &json!([])).unwrap();
        assert_eq!(listed, json!([{"id": 1}]));
    }

    #[test]
    fn test_scope_key() {
        assert_eq!(Store::scope_key("todos", None), "todos");
        assert_eq!(Store::scope_key("todos", Some("room-1")), "todos#room-1");
    }

    #[test]
    fn test_unique_record_ids() {
        let id1 = generate_record_id();
        let id2 = generate_record_id();
        assert_ne!(id1, id2);
    }
}
