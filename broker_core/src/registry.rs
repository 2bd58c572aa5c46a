//! The persistent per-instance/per-binding key-value registry: an in-memory
//! scratchpad (`Entry`) plus a backing record reached through
//! `ResourceStore`, named `<type-prefix>-<external-id>`.

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ErrorKind, Result};
use crate::resource_store::ResourceStore;

/// Which kind of external id this entry is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    ServiceInstance,
    ServiceBinding,
}

impl EntryKind {
    fn prefix(self) -> &'static str {
        match self {
            EntryKind::ServiceInstance => "service-instance",
            EntryKind::ServiceBinding => "service-binding",
        }
    }

    /// Record name: `<type-prefix>-<external-id>`.
    pub fn record_name(self, id: &str) -> String {
        format!("{}-{}", self.prefix(), id)
    }
}

/// Reserved system keys. Writable only by the core.
///
/// `created-resources` and `rendered-templates` aren't part of the user-facing
/// key set - they're the provisioner's bookkeeping for reverse-order deletion
/// and the update path's three-way merge - but the same "core-only" policy
/// applies to them, so they're reserved too.
pub const RESERVED_KEYS: &[&str] = &[
    "instance-id",
    "binding-id",
    "namespace",
    "service-id",
    "plan-id",
    "context",
    "parameters",
    "operation",
    "operation-id",
    "operation-status",
    "dashboard-url",
    "credentials",
    "created-resources",
    "rendered-templates",
];

/// Reserved keys a user-configured pipeline may not read as a named source.
/// `parameters` is core-written and read-only to users.
const USER_UNREADABLE_KEYS: &[&str] = &["parameters"];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

pub fn is_user_readable(key: &str) -> bool {
    !USER_UNREADABLE_KEYS.contains(&key)
}

/// A handle to one registry entry: an in-memory scratchpad plus (once
/// `Commit`ted) a backing record in the resource store.
#[derive(Clone, Debug)]
pub struct Entry {
    kind: EntryKind,
    id: String,
    data: BTreeMap<String, Value>,
    existed: bool,
}

impl Entry {
    /// A brand-new, not-yet-persisted scratchpad (`Open` on an absent entry).
    pub fn new_scratch(kind: EntryKind, id: String) -> Self {
        Entry { kind, id, data: BTreeMap::new(), existed: false }
    }

    fn from_persisted(kind: EntryKind, id: String, data: BTreeMap<String, Value>) -> Self {
        Entry { kind, id, data, existed: true }
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `false` until the first successful `Commit`.
    pub fn exists(&self) -> bool {
        self.existed
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(ErrorKind::Internal(format!("registry key '{}' is not a string: {:?}", key, other)).into()),
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        }
    }

    /// Core-only setter: bypasses the reserved-key write restriction. Used by
    /// the provisioner to write `service-id`, `dashboard-url`, etc.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    /// User-pipeline setter: fails if `key` is reserved.
    pub fn set_checked(&mut self, key: &str, value: Value) -> Result<()> {
        if is_reserved(key) {
            return Err(ErrorKind::ConfigurationError(format!("cannot write reserved registry key '{}'", key)).into());
        }
        self.set(key, value)
    }

    pub fn set_json<T: serde::Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?)
    }

    pub fn delete(&mut self, key: &str) {
        self.data.remove(key);
    }

    /// A plain snapshot, used by the template language's `registry()` function.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }
}

/// The registry: typed, durable key-value access scoped to `(kind, id)`.
///
/// Concurrent access to *different* entries is independent; concurrent
/// access to the *same* entry is serialized by whatever calls `Open` (the
/// operation manager ensures at most one in-flight operation per instance).
pub struct Registry<S: ResourceStore> {
    store: std::sync::Arc<S>,
}

impl<S: ResourceStore> Clone for Registry<S> {
    fn clone(&self) -> Self {
        Registry { store: self.store.clone() }
    }
}

impl<S: ResourceStore> Registry<S> {
    pub fn new(store: S) -> Self {
        Self::from_arc(std::sync::Arc::new(store))
    }

    /// Share an already-`Arc`-wrapped store, e.g. one the provisioner also
    /// holds directly for resource CRUD.
    pub fn from_arc(store: std::sync::Arc<S>) -> Self {
        Registry { store }
    }

    /// Loads the persisted record if any, or returns a fresh in-memory
    /// scratchpad.
    pub async fn open(&self, kind: EntryKind, id: &str) -> Result<Entry> {
        let name = kind.record_name(id);
        match self.store.get_record(&name).await? {
            Some(bytes) => {
                let data: BTreeMap<String, Value> = serde_json::from_slice(&bytes)?;
                Ok(Entry::from_persisted(kind, id.to_string(), data))
            }
            None => Ok(Entry::new_scratch(kind, id.to_string())),
        }
    }

    /// Persists the scratchpad. Subsequent opens will see `exists() == true`
    /// and the committed values.
    pub async fn commit(&self, entry: &mut Entry) -> Result<()> {
        let name = entry.kind.record_name(&entry.id);
        let bytes = serde_json::to_vec(&entry.data)?;
        self.store.put_record(&name, bytes).await?;
        entry.existed = true;
        Ok(())
    }

    /// Removes the entry. Only called once all resources tied to it have
    /// been deleted.
    pub async fn destroy(&self, entry: &Entry) -> Result<()> {
        let name = entry.kind.record_name(&entry.id);
        self.store.delete_record(&name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_store::test_support::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn commit_then_open_round_trips_every_key() {
        let registry = Registry::new(InMemoryStore::default());
        let mut entry = registry.open(EntryKind::ServiceInstance, "abc").await.unwrap();
        assert!(!entry.exists());
        entry.set("service-id", json!("svc-1")).unwrap();
        entry.set("plan-id", json!("plan-1")).unwrap();
        registry.commit(&mut entry).await.unwrap();
        assert!(entry.exists());

        let reopened = registry.open(EntryKind::ServiceInstance, "abc").await.unwrap();
        assert!(reopened.exists());
        assert_eq!(reopened.get("service-id"), Some(&json!("svc-1")));
        assert_eq!(reopened.get("plan-id"), Some(&json!("plan-1")));
    }

    #[test]
    fn user_pipeline_cannot_write_reserved_keys() {
        let mut entry = Entry::new_scratch(EntryKind::ServiceInstance, "abc".into());
        assert!(entry.set_checked("service-id", json!("x")).is_err());
        assert!(entry.set_checked("my-key", json!("x")).is_ok());
    }

    #[tokio::test]
    async fn destroy_removes_the_record() {
        let registry = Registry::new(InMemoryStore::default());
        let mut entry = registry.open(EntryKind::ServiceInstance, "abc").await.unwrap();
        registry.commit(&mut entry).await.unwrap();
        registry.destroy(&entry).await.unwrap();
        let reopened = registry.open(EntryKind::ServiceInstance, "abc").await.unwrap();
        assert!(!reopened.exists());
    }
}
