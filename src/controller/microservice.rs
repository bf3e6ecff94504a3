//! Microservice reconciler
//!
//! A new microservice has to be paired with the tenants that already exist,
//! so its reconcile runs the pairing matrix for every tenant of the
//! instance. Each tenant's bundle and routing table are then re-derived, which
//! moves the microservice's path and bundle entry when its functional area
//! changes.

use kube::ResourceExt;
use tracing::{info, instrument};

use super::matrix::resolve_tenant;
use super::teardown::teardown_microservice;
use super::tenant::sync_tenant;
use super::{request_namespace, Context, Outcome};
use crate::crd::{Microservice, Tenant};
use crate::store::{EntityStore, Labels, ObjectKey};
use crate::Result;

#[instrument(skip_all, fields(microservice = %key))]
pub(super) async fn reconcile<S: EntityStore>(
    ctx: &Context<S>,
    key: &ObjectKey,
) -> Result<Outcome> {
    let namespace = request_namespace("Microservice", key)?;
    let Some(microservice) = ctx.store.get::<Microservice>(key).await? else {
        info!("microservice deleted, tearing down its pairings");
        teardown_microservice(ctx, namespace, &key.name).await?;
        return Ok(Outcome::TornDown);
    };
    microservice.spec.validate()?;

    let tenants: Vec<Tenant> = ctx.store.list(Some(namespace), &Labels::new()).await?;
    let mut created = 0;
    for tenant in &tenants {
        created += resolve_tenant(ctx, tenant).await?;
        sync_tenant(ctx, namespace, &tenant.name_any()).await?;
    }
    info!(
        tenants = tenants.len(),
        created,
        area = %microservice.spec.functional_area,
        "microservice reconciled"
    );
    Ok(Outcome::Converged)
}
