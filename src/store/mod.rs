//! Typed entity store
//!
//! Every reconciler talks to the cluster through [`EntityStore`], a small
//! get/list/create/update/delete surface with exact-match label queries. The
//! answers the reconcilers branch on are part of the contract:
//!
//! - `get` returns `None` when the object does not exist
//! - `create` fails with [`Error::AlreadyExists`] on a name collision
//! - `update` fails with [`Error::Conflict`] when the object's
//!   `resourceVersion` is stale
//! - `delete` returns `false` when there was nothing to delete
//!
//! [`KubeStore`] backs the trait with the Kubernetes API, [`MemoryStore`] with
//! an in-process map that follows the same rules.

mod cluster;
mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub use cluster::KubeStore;
pub use memory::{MemoryStore, StoreOp};

use crate::crd::{
    Instance, InstanceConfiguration, Microservice, MicroserviceConfiguration, Tenant,
    TenantMicroservice,
};
use crate::{Error, Result};

/// Exact-match label set used to filter `list`
pub type Labels = BTreeMap<String, String>;

/// Name and optional namespace of a stored object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Object name
    pub name: String,
    /// Owning namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ObjectKey {
    /// Key of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Key of a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Key of an existing object
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            name: obj.name_any(),
            namespace: obj.namespace(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A kind the store can hold
///
/// Implementations only differ in how a kube [`Api`] is scoped, which is why
/// they are generated by the two macros below.
pub trait StoreObject:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Build an API handle for this kind, scoped to `namespace` when given
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;

    /// Kind name used in errors and logs
    fn kind_name() -> String {
        Self::kind(&()).to_string()
    }
}

macro_rules! namespaced_objects {
    ($($kind:ty),* $(,)?) => {
        $(
            impl StoreObject for $kind {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::all(client),
                    }
                }
            }
        )*
    };
}

macro_rules! cluster_objects {
    ($($kind:ty),* $(,)?) => {
        $(
            impl StoreObject for $kind {
                fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )*
    };
}

namespaced_objects!(
    Microservice,
    Tenant,
    TenantMicroservice,
    ConfigMap,
    Deployment,
    Service,
    Ingress,
);

cluster_objects!(Instance, InstanceConfiguration, MicroserviceConfiguration, Namespace);

/// Typed access to the object store
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Fetch one object, `None` if it does not exist
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// List objects in `namespace` (all namespaces when `None`) carrying every label in `labels`
    async fn list<K: StoreObject>(&self, namespace: Option<&str>, labels: &Labels)
        -> Result<Vec<K>>;

    /// Create an object; [`Error::AlreadyExists`] if the name is taken
    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Replace an object; [`Error::Conflict`] if its resourceVersion is stale
    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Delete an object, `false` if it did not exist
    async fn delete<K: StoreObject>(&self, key: &ObjectKey) -> Result<bool>;
}

/// Create `obj`, treating a name collision as success.
///
/// Returns `true` when this call created the object.
pub async fn ensure_created<S, K>(store: &S, obj: &K) -> Result<bool>
where
    S: EntityStore + ?Sized,
    K: StoreObject,
{
    match store.create(obj).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Fetch an object that must exist.
pub async fn get_required<S, K>(store: &S, key: &ObjectKey) -> Result<K>
where
    S: EntityStore + ?Sized,
    K: StoreObject,
{
    store
        .get::<K>(key)
        .await?
        .ok_or_else(|| Error::not_found(K::kind_name(), key.to_string()))
}

/// What a conflict-retried write ended up doing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The object did not exist and was created
    Created,
    /// The object existed and was replaced
    Updated,
    /// The stored object already matched
    Unchanged,
    /// The object was removed
    Deleted,
}

/// Read-modify-write one object under optimistic concurrency.
///
/// `desired` is handed the current object (or `None` when it does not exist)
/// and returns the object to store, or `None` when nothing needs writing. An
/// update is sent with the resourceVersion of the object it was derived from.
/// A conflict on update, or a collision on create, re-reads and calls
/// `desired` again, up to `attempts` times in total.
pub async fn upsert_with_retry<S, K, F>(
    store: &S,
    key: &ObjectKey,
    attempts: u32,
    mut desired: F,
) -> Result<WriteOutcome>
where
    S: EntityStore + ?Sized,
    K: StoreObject,
    F: FnMut(Option<&K>) -> Result<Option<K>> + Send,
{
    for attempt in 1..=attempts.max(1) {
        match store.get::<K>(key).await? {
            None => {
                let Some(obj) = desired(None)? else {
                    return Ok(WriteOutcome::Unchanged);
                };
                match store.create(&obj).await {
                    Ok(_) => return Ok(WriteOutcome::Created),
                    Err(e) if e.is_already_exists() => {
                        debug!(
                            kind = %K::kind_name(),
                            key = %key,
                            attempt,
                            "created concurrently, re-reading"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            Some(current) => {
                let Some(mut obj) = desired(Some(&current))? else {
                    return Ok(WriteOutcome::Unchanged);
                };
                obj.meta_mut().resource_version = current.resource_version();
                match store.update(&obj).await {
                    Ok(_) => return Ok(WriteOutcome::Updated),
                    Err(e) if e.is_conflict() => {
                        debug!(
                            kind = %K::kind_name(),
                            key = %key,
                            attempt,
                            "update conflict, re-reading"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Err(Error::conflict(K::kind_name(), key.to_string()))
}

/// Render a label set as a Kubernetes label selector
pub fn label_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when `obj` carries every label in `labels`
pub fn matches_labels<K: Resource>(obj: &K, labels: &Labels) -> bool {
    let have = obj.labels();
    labels.iter().all(|(k, v)| have.get(k) == Some(v))
}
