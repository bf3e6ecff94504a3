//! Kubernetes-backed entity store

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::trace;

use super::{label_selector, EntityStore, Labels, ObjectKey, StoreObject};
use crate::{Error, Result};

/// Real store implementation over the Kubernetes API
///
/// Cheap to clone; the wrapped [`Client`] shares one connection pool.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: Option<String>,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: None,
        }
    }

    /// Record `manager` as the field manager of every create and replace
    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = Some(manager.into());
        self
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: self.field_manager.clone(),
            ..Default::default()
        }
    }

    /// The wrapped client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn object_name<K: StoreObject>(obj: &K) -> Result<String> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| Error::validation(format!("{} has no metadata.name", K::kind_name())))
}

#[async_trait]
impl EntityStore for KubeStore {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        match api.get(&key.name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                trace!(kind = %K::kind_name(), key = %key, "object not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<K>> {
        let api = K::api(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&label_selector(labels));
        }
        let list = api.list(&params).await?;
        Ok(list.items)
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        match api.create(&self.post_params(), obj).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::already_exists(K::kind_name(), name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        match api.replace(&name, &self.post_params(), obj).await {
            Ok(updated) => Ok(updated),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::conflict(K::kind_name(), name))
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(Error::not_found(K::kind_name(), name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete<K: StoreObject>(&self, key: &ObjectKey) -> Result<bool> {
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
