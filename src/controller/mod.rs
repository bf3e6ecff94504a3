//! Reconcilers for the devicechain entities
//!
//! Every reconcile is keyed by kind and name. The entity is read fresh from
//! the store: if it exists its derived state is converged, if it is gone its
//! dependents are torn down. There are no finalizers, so a delete and an
//! update of the same object arrive as the same request.

mod context;
mod instance;
mod matrix;
mod microservice;
mod teardown;
mod tenant;
mod tenant_microservice;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

pub use context::{Context, Settings, DEFAULT_MAX_CONFLICT_RETRIES};
pub use matrix::{resolve_tenant, template_configuration};
pub use teardown::{teardown_microservice, teardown_pairing, teardown_tenant};

use crate::store::{EntityStore, ObjectKey};
use crate::{Error, Result};

/// Entity kinds with a reconciler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    /// Cluster-scoped Instance
    Instance,
    /// Tenant of an instance
    Tenant,
    /// Microservice of an instance
    Microservice,
    /// Tenant/microservice pairing
    TenantMicroservice,
}

impl EntityKind {
    /// Every kind, in the order watchers are started
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Instance,
        EntityKind::Tenant,
        EntityKind::Microservice,
        EntityKind::TenantMicroservice,
    ];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instance => "Instance",
            Self::Tenant => "Tenant",
            Self::Microservice => "Microservice",
            Self::TenantMicroservice => "TenantMicroservice",
        };
        f.write_str(name)
    }
}

/// One unit of work for a reconciler
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
    /// Kind of the changed entity
    pub kind: EntityKind,
    /// Name and namespace of the changed entity
    pub key: ObjectKey,
}

impl ReconcileRequest {
    /// Create a request
    pub fn new(kind: EntityKind, key: ObjectKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// What a reconcile did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The entity exists and its derived state was converged
    Converged,
    /// The entity is gone and its dependents were removed
    TornDown,
    /// Nothing to do for this request
    Ignored,
}

/// Reconcile entry point the dispatcher drives
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Run one reconcile, stopping early once `cancel` fires
    async fn reconcile(&self, request: ReconcileRequest, cancel: CancellationToken)
        -> Result<Outcome>;
}

/// The reconcilers of every entity kind over one shared [`Context`]
pub struct Operator<S: EntityStore> {
    ctx: Arc<Context<S>>,
}

impl<S: EntityStore> Operator<S> {
    /// Create an operator over a context
    pub fn new(ctx: Arc<Context<S>>) -> Self {
        Self { ctx }
    }

    /// The shared context
    pub fn context(&self) -> &Arc<Context<S>> {
        &self.ctx
    }

    async fn dispatch(&self, request: &ReconcileRequest) -> Result<Outcome> {
        let ctx = self.ctx.as_ref();
        match request.kind {
            EntityKind::Instance => instance::reconcile(ctx, &request.key).await,
            EntityKind::Tenant => tenant::reconcile(ctx, &request.key).await,
            EntityKind::Microservice => microservice::reconcile(ctx, &request.key).await,
            EntityKind::TenantMicroservice => {
                tenant_microservice::reconcile(ctx, &request.key).await
            }
        }
    }
}

#[async_trait]
impl<S: EntityStore> Reconciler for Operator<S> {
    async fn reconcile(
        &self,
        request: ReconcileRequest,
        cancel: CancellationToken,
    ) -> Result<Outcome> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.dispatch(&request) => result,
        }
    }
}

/// Namespace of a namespaced request, an invariant violation when absent
pub(crate) fn request_namespace<'a>(kind: &str, key: &'a ObjectKey) -> Result<&'a str> {
    key.namespace
        .as_deref()
        .ok_or_else(|| Error::invariant(format!("{} {} has no namespace", kind, key.name)))
}
