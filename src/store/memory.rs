//! In-process entity store
//!
//! Objects are kept as JSON keyed by (kind, namespace, name). Every write
//! stamps a fresh `resourceVersion`, and an update carrying a stale one is
//! rejected with a conflict, so read-modify-write code behaves the same way
//! it does against an API server. Faults can be queued per kind and
//! operation to drive error paths in tests.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use kube::ResourceExt;
use parking_lot::Mutex;

use super::{matches_labels, EntityStore, Labels, ObjectKey, StoreObject};
use crate::{Error, Result};

/// Store operation a fault can be attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    /// `get`
    Get,
    /// `list`
    List,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

type Slot = (String, Option<String>, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Slot, serde_json::Value>,
    version: u64,
    faults: VecDeque<(String, StoreOp, Fault)>,
}

#[derive(Clone, Copy, Debug)]
enum Fault {
    Conflict,
    Failure,
}

impl Inner {
    fn take_fault(&mut self, kind: &str, op: StoreOp) -> Option<Fault> {
        let idx = self
            .faults
            .iter()
            .position(|(k, o, _)| k == kind && *o == op)?;
        self.faults.remove(idx).map(|(_, _, fault)| fault)
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-memory [`EntityStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` updates of kind `K` fail with a conflict
    pub fn inject_conflicts<K: StoreObject>(&self, count: usize) {
        let mut inner = self.inner.lock();
        for _ in 0..count {
            inner
                .faults
                .push_back((K::kind_name(), StoreOp::Update, Fault::Conflict));
        }
    }

    /// Make the next `op` on kind `K` fail with a store error
    pub fn inject_failure<K: StoreObject>(&self, op: StoreOp) {
        self.inner
            .lock()
            .faults
            .push_back((K::kind_name(), op, Fault::Failure));
    }

    /// All stored objects of kind `K`, across namespaces
    pub fn all<K: StoreObject>(&self) -> Vec<K> {
        let kind = K::kind_name();
        let inner = self.inner.lock();
        inner
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .filter_map(|(_, value)| serde_json::from_value(value.clone()).ok())
            .collect()
    }

    /// Number of stored objects of kind `K`
    pub fn count<K: StoreObject>(&self) -> usize {
        let kind = K::kind_name();
        self.inner
            .lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }

    /// True if an object of kind `K` exists under `key`
    pub fn contains<K: StoreObject>(&self, key: &ObjectKey) -> bool {
        self.inner.lock().objects.contains_key(&slot::<K>(key))
    }

    fn fail(&self, kind: &str, op: StoreOp) -> Result<()> {
        match self.inner.lock().take_fault(kind, op) {
            None => Ok(()),
            Some(Fault::Failure) => Err(Error::store(format!(
                "injected {:?} failure for {}",
                op, kind
            ))),
            Some(Fault::Conflict) => Err(Error::conflict(kind, "injected")),
        }
    }
}

fn slot<K: StoreObject>(key: &ObjectKey) -> Slot {
    (K::kind_name(), key.namespace.clone(), key.name.clone())
}

fn decode<K: StoreObject>(value: &serde_json::Value) -> Result<K> {
    Ok(serde_json::from_value(value.clone())?)
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.fail(&K::kind_name(), StoreOp::Get)?;
        let inner = self.inner.lock();
        inner
            .objects
            .get(&slot::<K>(key))
            .map(decode::<K>)
            .transpose()
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<K>> {
        let kind = K::kind_name();
        self.fail(&kind, StoreOp::List)?;
        let inner = self.inner.lock();
        let mut items = Vec::new();
        for ((k, ns, _), value) in inner.objects.iter() {
            if *k != kind {
                continue;
            }
            if namespace.is_some() && ns.as_deref() != namespace {
                continue;
            }
            let obj: K = decode(value)?;
            if matches_labels(&obj, labels) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let kind = K::kind_name();
        self.fail(&kind, StoreOp::Create)?;
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or_else(|| Error::validation(format!("{} has no metadata.name", kind)))?;
        let key = ObjectKey {
            name: name.clone(),
            namespace: obj.namespace(),
        };

        let mut inner = self.inner.lock();
        let slot = slot::<K>(&key);
        if inner.objects.contains_key(&slot) {
            return Err(Error::already_exists(kind, name));
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(inner.next_version());
        inner.objects.insert(slot, serde_json::to_value(&stored)?);
        Ok(stored)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let kind = K::kind_name();
        self.fail(&kind, StoreOp::Update)?;
        let key = ObjectKey::of(obj);

        let mut inner = self.inner.lock();
        let slot = slot::<K>(&key);
        let current: K = match inner.objects.get(&slot) {
            Some(value) => decode(value)?,
            None => return Err(Error::not_found(kind, key.to_string())),
        };
        if let Some(expected) = obj.resource_version() {
            if current.resource_version().as_deref() != Some(expected.as_str()) {
                return Err(Error::conflict(kind, key.name));
            }
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(inner.next_version());
        inner.objects.insert(slot, serde_json::to_value(&stored)?);
        Ok(stored)
    }

    async fn delete<K: StoreObject>(&self, key: &ObjectKey) -> Result<bool> {
        self.fail(&K::kind_name(), StoreOp::Delete)?;
        Ok(self.inner.lock().objects.remove(&slot::<K>(key)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(ns: &str, name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_collides_on_name() {
        let store = MemoryStore::new();
        let cm = config_map("dc1", "a", &[]);

        store.create(&cm).await.unwrap();
        let err = store.create(&cm).await.unwrap_err();

        assert!(err.is_already_exists());
        assert_eq!(store.count::<ConfigMap>(), 1);
    }

    #[tokio::test]
    async fn test_same_name_in_other_namespace_is_distinct() {
        let store = MemoryStore::new();
        store.create(&config_map("dc1", "a", &[])).await.unwrap();
        store.create(&config_map("dc2", "a", &[])).await.unwrap();

        assert_eq!(store.count::<ConfigMap>(), 2);
        let in_dc1: Vec<ConfigMap> = store.list(Some("dc1"), &Labels::new()).await.unwrap();
        assert_eq!(in_dc1.len(), 1);
        let everywhere: Vec<ConfigMap> = store.list(None, &Labels::new()).await.unwrap();
        assert_eq!(everywhere.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("dc1", "a", &[])).await.unwrap();

        let mut first = created.clone();
        first.data = Some(BTreeMap::from([("k".to_string(), "1".to_string())]));
        store.update(&first).await.unwrap();

        let mut second = created;
        second.data = Some(BTreeMap::from([("k".to_string(), "2".to_string())]));
        let err = store.update(&second).await.unwrap_err();
        assert!(err.is_conflict());

        let stored: ConfigMap = store
            .get(&ObjectKey::namespaced("dc1", "a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data.unwrap()["k"], "1");
    }

    #[tokio::test]
    async fn test_list_filters_by_labels() {
        let store = MemoryStore::new();
        store
            .create(&config_map("dc1", "a", &[("tenant", "t1")]))
            .await
            .unwrap();
        store
            .create(&config_map("dc1", "b", &[("tenant", "t2")]))
            .await
            .unwrap();

        let selector = Labels::from([("tenant".to_string(), "t1".to_string())]);
        let items: Vec<ConfigMap> = store.list(Some("dc1"), &selector).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name_any(), "a");
    }

    #[tokio::test]
    async fn test_delete_reports_absence() {
        let store = MemoryStore::new();
        store.create(&config_map("dc1", "a", &[])).await.unwrap();
        let key = ObjectKey::namespaced("dc1", "a");

        assert!(store.delete::<ConfigMap>(&key).await.unwrap());
        assert!(!store.delete::<ConfigMap>(&key).await.unwrap());
        assert!(!store.contains::<ConfigMap>(&key));
    }

    #[tokio::test]
    async fn test_injected_faults_fire_once() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("dc1", "a", &[])).await.unwrap();

        store.inject_conflicts::<ConfigMap>(1);
        assert!(store.update(&created).await.unwrap_err().is_conflict());
        assert!(store.update(&created).await.is_ok());

        store.inject_failure::<ConfigMap>(StoreOp::Get);
        let key = ObjectKey::namespaced("dc1", "a");
        assert!(store.get::<ConfigMap>(&key).await.is_err());
        assert!(store.get::<ConfigMap>(&key).await.unwrap().is_some());
    }
}
