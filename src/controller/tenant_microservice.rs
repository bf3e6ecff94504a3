//! TenantMicroservice (pairing) reconciler
//!
//! A live pairing gets its workload and endpoint, its entry in the tenant
//! bundle and a path in the tenant routing table, in that order. A deleted
//! pairing is cleaned up by [`teardown_pairing`].
//!
//! The tenant is checked before the bundle is touched and again after the
//! routing table is written. A tenant deleted in between has had its teardown
//! run already, so the reconcile removes what it just recreated.

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::teardown::teardown_pairing;
use super::tenant::discard_if_tenant_gone;
use super::{request_namespace, Context, Outcome};
use crate::bundle::apply_tenant_entry;
use crate::crd::{Microservice, Tenant, TenantMicroservice};
use crate::ingress::rebuild_routing_table;
use crate::store::{EntityStore, ObjectKey};
use crate::workload::synthesize;
use crate::{Error, Result};

#[instrument(skip_all, fields(pairing = %key))]
pub(super) async fn reconcile<S: EntityStore>(
    ctx: &Context<S>,
    key: &ObjectKey,
) -> Result<Outcome> {
    let namespace = request_namespace("TenantMicroservice", key)?;
    let Some(pairing) = ctx.store.get::<TenantMicroservice>(key).await? else {
        info!("pairing deleted, tearing down");
        teardown_pairing(ctx, namespace, &key.name, None).await?;
        return Ok(Outcome::TornDown);
    };
    pairing.spec.validate()?;

    let tenant_id = pairing.spec.tenant_id.as_str();
    let tenant_key = ObjectKey::namespaced(namespace, tenant_id);
    if ctx.store.get::<Tenant>(&tenant_key).await?.is_none() {
        return Err(Error::invariant(format!(
            "pairing {} references missing tenant {}",
            pairing.name_any(),
            tenant_id
        )));
    }

    let synthesis = synthesize(ctx, &pairing).await?;
    debug!(?synthesis, "children ensured");

    let microservice: Microservice = ctx
        .store
        .get(&ObjectKey::namespaced(namespace, pairing.spec.microservice_id.as_str()))
        .await?
        .ok_or_else(|| {
            Error::invariant(format!(
                "pairing {} references missing microservice {}",
                pairing.name_any(),
                pairing.spec.microservice_id
            ))
        })?;

    let bundle = apply_tenant_entry(
        ctx,
        namespace,
        tenant_id,
        &microservice.spec.functional_area,
        &pairing.spec.configuration,
    )
    .await?;
    let routing = rebuild_routing_table(ctx, namespace, tenant_id).await?;
    if discard_if_tenant_gone(ctx, namespace, tenant_id).await? {
        info!(tenant = %tenant_id, "tenant deleted during reconcile");
        return Ok(Outcome::TornDown);
    }

    info!(?bundle, ?routing, "pairing reconciled");
    Ok(Outcome::Converged)
}
