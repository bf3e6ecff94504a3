//! Cascading teardown
//!
//! Teardown runs when a reconcile finds its entity gone. Each step is
//! idempotent and safe to repeat after a partial failure.
//!
//! A pairing's tenant id is recovered from the tenant label of its workload
//! or endpoint, so the bundle and routing table are fixed up before either
//! of those is deleted.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use super::tenant::sync_tenant;
use super::Context;
use crate::bundle::delete_tenant_bundle;
use crate::crd::TenantMicroservice;
use crate::ingress::delete_routing_table;
use crate::naming;
use crate::store::{EntityStore, Labels, ObjectKey};
use crate::Result;

fn tenant_label<K: Resource>(obj: &K) -> Option<String> {
    obj.labels().get(naming::LABEL_TENANT).cloned()
}

async fn pairing_tenant<S: EntityStore>(
    ctx: &Context<S>,
    key: &ObjectKey,
) -> Result<Option<String>> {
    let deployment: Option<Deployment> = ctx.store.get(key).await?;
    if let Some(tenant) = deployment.as_ref().and_then(tenant_label) {
        return Ok(Some(tenant));
    }
    let service: Option<Service> = ctx.store.get(key).await?;
    Ok(service.as_ref().and_then(tenant_label))
}

/// Remove what a deleted pairing left behind.
///
/// The tenant bundle is synced to the tenant's remaining pairings and the
/// routing table is rebuilt, then the Deployment and the
/// Service are deleted. `tenant_id` is used when the caller already knows
/// it; otherwise it is read from the children, and when neither child is
/// left there is nothing to do.
pub async fn teardown_pairing<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
    tenant_id: Option<&str>,
) -> Result<()> {
    let key = ObjectKey::namespaced(namespace, name);
    let tenant_id = match tenant_id {
        Some(id) => id.to_string(),
        None => match pairing_tenant(ctx, &key).await? {
            Some(id) => id,
            None => {
                debug!(pairing = %name, "no children left");
                return Ok(());
            }
        },
    };

    sync_tenant(ctx, namespace, &tenant_id).await?;

    let deployment_deleted = ctx.store.delete::<Deployment>(&key).await?;
    let service_deleted = ctx.store.delete::<Service>(&key).await?;
    info!(
        pairing = %name,
        tenant = %tenant_id,
        deployment_deleted,
        service_deleted,
        "pairing torn down"
    );
    Ok(())
}

async fn delete_pairings<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    selector: &Labels,
) -> Result<usize> {
    let pairings: Vec<TenantMicroservice> = ctx.store.list(Some(namespace), selector).await?;
    let count = pairings.len();
    for tms in pairings {
        let name = tms.name_any();
        ctx.store
            .delete::<TenantMicroservice>(&ObjectKey::namespaced(namespace, name.as_str()))
            .await?;
        teardown_pairing(ctx, namespace, &name, Some(tms.spec.tenant_id.as_str())).await?;
    }
    Ok(count)
}

/// Remove everything a deleted tenant owned: its pairings with their
/// children, then its bundle, then its routing table.
pub async fn teardown_tenant<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    tenant_id: &str,
) -> Result<()> {
    let removed = delete_pairings(ctx, namespace, &naming::tenant_selector(tenant_id)).await?;
    delete_tenant_bundle(ctx, namespace, tenant_id).await?;
    delete_routing_table(ctx, namespace, tenant_id).await?;
    info!(tenant = %tenant_id, pairings = removed, "tenant torn down");
    Ok(())
}

/// Remove every pairing of a deleted microservice, with their children.
pub async fn teardown_microservice<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    microservice_id: &str,
) -> Result<()> {
    let removed =
        delete_pairings(ctx, namespace, &naming::microservice_selector(microservice_id)).await?;
    info!(microservice = %microservice_id, pairings = removed, "microservice torn down");
    Ok(())
}
