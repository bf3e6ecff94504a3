//! Tenant reconciler

use tracing::{info, instrument, warn};

use super::matrix::resolve_tenant;
use super::teardown::teardown_tenant;
use super::{request_namespace, Context, Outcome};
use crate::bundle::{delete_tenant_bundle, sync_tenant_bundle};
use crate::crd::Tenant;
use crate::ingress::{delete_routing_table, rebuild_routing_table};
use crate::pairing::resolve_for_tenant;
use crate::store::{EntityStore, ObjectKey, WriteOutcome};
use crate::Result;

/// Pair a tenant with every microservice of its instance, or tear the
/// tenant down when it is gone.
#[instrument(skip_all, fields(tenant = %key))]
pub(super) async fn reconcile<S: EntityStore>(
    ctx: &Context<S>,
    key: &ObjectKey,
) -> Result<Outcome> {
    let namespace = request_namespace("Tenant", key)?;
    match ctx.store.get::<Tenant>(key).await? {
        Some(tenant) => {
            let created = resolve_tenant(ctx, &tenant).await?;
            info!(created, "tenant reconciled");
            Ok(Outcome::Converged)
        }
        None => {
            info!("tenant deleted, tearing down");
            teardown_tenant(ctx, namespace, &key.name).await?;
            Ok(Outcome::TornDown)
        }
    }
}

/// Re-derive a tenant's bundle and routing table from its live pairings.
///
/// Returns `false` when the tenant turned out to be gone, in which case
/// whatever was just written for it has been removed again.
pub(super) async fn sync_tenant<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    tenant_id: &str,
) -> Result<bool> {
    let pairings = resolve_for_tenant(ctx.store.as_ref(), namespace, tenant_id).await?;
    sync_tenant_bundle(ctx, namespace, tenant_id, &pairings).await?;
    rebuild_routing_table(ctx, namespace, tenant_id).await?;
    Ok(!discard_if_tenant_gone(ctx, namespace, tenant_id).await?)
}

/// Delete a tenant's bundle and routing table if the tenant no longer exists.
///
/// Must run after any write that may create either object. A tenant
/// teardown that slipped in between the write and this check has already
/// deleted them once, and nothing else would delete them again.
pub(super) async fn discard_if_tenant_gone<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    tenant_id: &str,
) -> Result<bool> {
    let key = ObjectKey::namespaced(namespace, tenant_id);
    if ctx.store.get::<Tenant>(&key).await?.is_some() {
        return Ok(false);
    }
    let bundle = delete_tenant_bundle(ctx, namespace, tenant_id).await?;
    let routing = delete_routing_table(ctx, namespace, tenant_id).await?;
    if bundle == WriteOutcome::Deleted || routing == WriteOutcome::Deleted {
        warn!(
            tenant = %tenant_id,
            "tenant deleted while its bundle or routing table was being written, removed them again"
        );
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{apply_tenant_entry, tenant_bundle_key};
    use crate::crd::{EntityConfiguration, TenantSpec};
    use crate::store::MemoryStore;
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_writes_for_a_vanished_tenant_are_discarded() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Context::new(store.clone());
        apply_tenant_entry(&ctx, "dc1", "t1", "a", &EntityConfiguration::default())
            .await
            .unwrap();

        assert!(discard_if_tenant_gone(&ctx, "dc1", "t1").await.unwrap());
        assert!(!store.contains::<ConfigMap>(&tenant_bundle_key("dc1", "t1")));
    }

    #[tokio::test]
    async fn test_live_tenant_keeps_its_bundle() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Context::new(store.clone());
        let mut tenant = Tenant::new(
            "t1",
            TenantSpec {
                name: "t1".to_string(),
                description: String::new(),
            },
        );
        tenant.metadata.namespace = Some("dc1".to_string());
        store.create(&tenant).await.unwrap();
        apply_tenant_entry(&ctx, "dc1", "t1", "a", &EntityConfiguration::default())
            .await
            .unwrap();

        assert!(!discard_if_tenant_gone(&ctx, "dc1", "t1").await.unwrap());
        assert!(sync_tenant(&ctx, "dc1", "t1").await.unwrap());
        // No pairings left: the area is dropped, the bundle itself stays
        let cm: ConfigMap = store
            .get(&tenant_bundle_key("dc1", "t1"))
            .await
            .unwrap()
            .unwrap();
        assert!(cm.data.unwrap_or_default().is_empty());
    }
}
