//! Tenant routing tables
//!
//! Each tenant of an instance gets one Ingress, `{instance}-{tenant}-ingress`,
//! with a regex path per functional area pointing at the Service of the
//! pairing serving that area. The table is always rebuilt from the full set
//! of the tenant's pairings and written in one piece, so concurrent rebuilds
//! converge on the same object.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::controller::Context;
use crate::naming;
use crate::pairing::{resolve_for_tenant, ResolvedPairing};
use crate::store::{upsert_with_retry, EntityStore, ObjectKey, WriteOutcome};
use crate::Result;

/// Annotation enabling regex paths
pub const ANNOTATION_USE_REGEX: &str = "nginx.ingress.kubernetes.io/use-regex";
/// Annotation rewriting the matched path before it reaches the service
pub const ANNOTATION_REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";
/// Path type of every rule
pub const PATH_TYPE: &str = "ImplementationSpecific";

/// Key of a tenant's routing table
pub fn routing_table_key(instance_id: &str, tenant_id: &str) -> ObjectKey {
    ObjectKey::namespaced(instance_id, naming::routing_table_name(instance_id, tenant_id))
}

/// Path rules of a tenant, path to backing service name.
///
/// Pairings are expected in name order; when two share a functional area the
/// first one keeps the path.
pub fn routing_rules(
    instance_id: &str,
    tenant_id: &str,
    pairings: &[ResolvedPairing],
) -> BTreeMap<String, String> {
    let mut rules = BTreeMap::new();
    for p in pairings {
        rules
            .entry(naming::routing_path(instance_id, tenant_id, &p.functional_area))
            .or_insert_with(|| p.name());
    }
    rules
}

/// Build a tenant's routing table, `None` when there is nothing to route
pub fn build_routing_table(
    instance_id: &str,
    tenant_id: &str,
    pairings: &[ResolvedPairing],
    ingress_class: Option<&str>,
) -> Option<Ingress> {
    let rules = routing_rules(instance_id, tenant_id, pairings);
    if rules.is_empty() {
        return None;
    }

    let paths = rules
        .into_iter()
        .map(|(path, service)| HTTPIngressPath {
            path: Some(path),
            path_type: PATH_TYPE.to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: service,
                    port: Some(ServiceBackendPort {
                        number: Some(i32::from(naming::SERVICE_PORT)),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
        })
        .collect();

    let mut labels = naming::tenant_selector(tenant_id);
    labels.insert(
        naming::LABEL_MANAGED_BY.to_string(),
        naming::MANAGED_BY.to_string(),
    );

    Some(Ingress {
        metadata: ObjectMeta {
            name: Some(naming::routing_table_name(instance_id, tenant_id)),
            namespace: Some(instance_id.to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([
                (ANNOTATION_USE_REGEX.to_string(), "true".to_string()),
                (
                    ANNOTATION_REWRITE_TARGET.to_string(),
                    naming::REWRITE_TARGET.to_string(),
                ),
            ])),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: ingress_class.map(str::to_string),
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue { paths }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn is_current(current: &Ingress, desired: &Ingress) -> bool {
    current.spec == desired.spec
        && current.metadata.labels == desired.metadata.labels
        && current.metadata.annotations == desired.metadata.annotations
}

/// Recompute a tenant's routing table from its pairings and store it.
///
/// A table that would be empty is deleted instead of written.
pub async fn rebuild_routing_table<S: EntityStore>(
    ctx: &Context<S>,
    instance_id: &str,
    tenant_id: &str,
) -> Result<WriteOutcome> {
    let pairings = resolve_for_tenant(ctx.store.as_ref(), instance_id, tenant_id).await?;
    let desired = build_routing_table(
        instance_id,
        tenant_id,
        &pairings,
        ctx.settings.ingress_class.as_deref(),
    );

    let Some(desired) = desired else {
        debug!(tenant = %tenant_id, "no routable pairings");
        return delete_routing_table(ctx, instance_id, tenant_id).await;
    };

    let key = routing_table_key(instance_id, tenant_id);
    let outcome = upsert_with_retry(
        ctx.store.as_ref(),
        &key,
        ctx.write_attempts(),
        |current: Option<&Ingress>| match current {
            Some(current) if is_current(current, &desired) => Ok(None),
            _ => Ok(Some(desired.clone())),
        },
    )
    .await?;

    if outcome != WriteOutcome::Unchanged {
        info!(
            tenant = %tenant_id,
            paths = pairings.len(),
            ?outcome,
            "routing table rebuilt"
        );
    }
    Ok(outcome)
}

/// Delete a tenant's routing table
pub async fn delete_routing_table<S: EntityStore>(
    ctx: &Context<S>,
    instance_id: &str,
    tenant_id: &str,
) -> Result<WriteOutcome> {
    let key = routing_table_key(instance_id, tenant_id);
    if ctx.store.delete::<Ingress>(&key).await? {
        info!(tenant = %tenant_id, "deleted routing table");
        Ok(WriteOutcome::Deleted)
    } else {
        Ok(WriteOutcome::Unchanged)
    }
}
