//! Instance reconciler

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::ObjectMeta;
use tracing::{info, instrument, warn};

use super::{Context, Outcome};
use crate::bundle::ensure_instance_bundle;
use crate::crd::{Instance, InstanceConfiguration};
use crate::naming;
use crate::store::{ensure_created, get_required, EntityStore, Labels, ObjectKey};
use crate::Result;

fn isolation_namespace(instance_id: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(instance_id.to_string()),
            labels: Some(Labels::from([(
                naming::LABEL_MANAGED_BY.to_string(),
                naming::MANAGED_BY.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Ensure an instance has its namespace and configuration bundle.
///
/// Deleted instances are left alone; whatever they owned stays in place.
#[instrument(skip_all, fields(instance = %key.name))]
pub(super) async fn reconcile<S: EntityStore>(
    ctx: &Context<S>,
    key: &ObjectKey,
) -> Result<Outcome> {
    let store = ctx.store.as_ref();
    let Some(instance) = store.get::<Instance>(key).await? else {
        warn!("instance deleted; its namespace and bundles are not cleaned up");
        return Ok(Outcome::Ignored);
    };
    instance.spec.validate()?;

    let instance_id = key.name.as_str();
    if ensure_created(store, &isolation_namespace(instance_id)).await? {
        info!("created instance namespace");
    }

    let bundle_key = ObjectKey::namespaced(instance_id, naming::instance_bundle_name(instance_id));
    if store.get::<ConfigMap>(&bundle_key).await?.is_none() {
        let template: InstanceConfiguration = get_required(
            store,
            &ObjectKey::cluster(instance.spec.configuration_id.as_str()),
        )
        .await?;
        ensure_instance_bundle(ctx, instance_id, &template.spec.configuration).await?;
    }

    Ok(Outcome::Converged)
}
