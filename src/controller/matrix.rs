//! Tenant x microservice pairing matrix
//!
//! Every tenant of an instance is paired with every microservice of the
//! same instance. Pairings have deterministic names, so creating one that
//! already exists is treated as success and the resolver can be re-run at
//! any time.

use std::collections::BTreeSet;

use kube::ResourceExt;
use tracing::{debug, info};

use super::Context;
use crate::crd::{
    EntityConfiguration, Microservice, MicroserviceConfiguration, Tenant, TenantMicroservice,
};
use crate::naming;
use crate::store::{ensure_created, get_required, EntityStore, Labels, ObjectKey};
use crate::{Error, Result};

/// Configuration copied into a new pairing of `microservice`.
///
/// A missing template is reported as not found; it may still be created.
pub async fn template_configuration<S: EntityStore>(
    ctx: &Context<S>,
    microservice: &Microservice,
) -> Result<EntityConfiguration> {
    let template: MicroserviceConfiguration = get_required(
        ctx.store.as_ref(),
        &ObjectKey::cluster(microservice.spec.configuration_id.as_str()),
    )
    .await?;
    Ok(template.spec.configuration)
}

/// Create the missing pairings of a tenant.
///
/// Returns the number of pairings this call created. A failure stops at the
/// failing pairing; pairings created before it stay.
pub async fn resolve_tenant<S: EntityStore>(ctx: &Context<S>, tenant: &Tenant) -> Result<usize> {
    let tenant_id = tenant.name_any();
    let namespace = tenant
        .namespace()
        .ok_or_else(|| Error::invariant(format!("tenant {} has no namespace", tenant_id)))?;
    let store = ctx.store.as_ref();

    let microservices: Vec<Microservice> =
        store.list(Some(namespace.as_str()), &Labels::new()).await?;
    let paired: BTreeSet<String> = store
        .list::<TenantMicroservice>(
            Some(namespace.as_str()),
            &naming::tenant_selector(&tenant_id),
        )
        .await?
        .into_iter()
        .map(|tms| tms.spec.microservice_id)
        .collect();

    let missing: Vec<&Microservice> = microservices
        .iter()
        .filter(|ms| !paired.contains(&ms.name_any()))
        .collect();
    debug!(
        tenant = %tenant_id,
        microservices = microservices.len(),
        missing = missing.len(),
        "resolved pairing matrix"
    );

    let mut created = 0;
    for ms in missing {
        let ms_id = ms.name_any();
        let configuration = template_configuration(ctx, ms).await?;
        let pairing = TenantMicroservice::for_pair(&namespace, &tenant_id, &ms_id, configuration);
        if ensure_created(store, &pairing).await? {
            info!(tenant = %tenant_id, microservice = %ms_id, "created missing pairing");
            created += 1;
        } else {
            debug!(tenant = %tenant_id, microservice = %ms_id, "pairing already exists");
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{MicroserviceConfigurationSpec, MicroserviceSpec, TenantSpec};
    use crate::store::{MemoryStore, StoreOp};
    use serde_json::json;
    use std::sync::Arc;

    fn tenant(id: &str) -> Tenant {
        let mut t = Tenant::new(
            id,
            TenantSpec {
                name: id.to_string(),
                description: String::new(),
            },
        );
        t.metadata.namespace = Some("dc1".to_string());
        t
    }

    async fn seed_microservice(store: &MemoryStore, id: &str, payload: serde_json::Value) {
        let mut ms = Microservice::new(
            id,
            MicroserviceSpec {
                name: id.to_string(),
                description: String::new(),
                functional_area: id.to_string(),
                image: format!("devicechain/{}:1.0", id),
                image_pull_policy: None,
                configuration_id: format!("{}-default", id),
            },
        );
        ms.metadata.namespace = Some("dc1".to_string());
        store.create(&ms).await.unwrap();

        let template = MicroserviceConfiguration::new(
            &format!("{}-default", id),
            MicroserviceConfigurationSpec {
                functional_area: id.to_string(),
                image: String::new(),
                configuration: EntityConfiguration::new(payload),
            },
        );
        store.create(&template).await.unwrap();
    }

    /// Story: a tenant is paired with every microservice exactly once
    ///
    /// Three microservices and a tenant with no pairings give three
    /// pairings; running again creates nothing.
    #[tokio::test]
    async fn story_missing_pairings_are_created_once() {
        let store = Arc::new(MemoryStore::new());
        for id in ["m1", "m2", "m3"] {
            seed_microservice(&store, id, json!({"id": id})).await;
        }
        let ctx = Context::new(store.clone());

        assert_eq!(resolve_tenant(&ctx, &tenant("t1")).await.unwrap(), 3);
        assert_eq!(resolve_tenant(&ctx, &tenant("t1")).await.unwrap(), 0);
        assert_eq!(store.count::<TenantMicroservice>(), 3);
    }

    #[tokio::test]
    async fn test_pairing_copies_the_template_configuration() {
        let store = Arc::new(MemoryStore::new());
        seed_microservice(&store, "m1", json!({"retries": 3})).await;
        let ctx = Context::new(store.clone());

        resolve_tenant(&ctx, &tenant("t1")).await.unwrap();

        let tms: TenantMicroservice = store
            .get(&ObjectKey::namespaced("dc1", "tms-t1-m1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tms.spec.configuration.0, json!({"retries": 3}));
        assert_eq!(tms.spec.tenant_id, "t1");
        assert_eq!(tms.spec.microservice_id, "m1");
    }

    #[tokio::test]
    async fn test_missing_template_is_retryable() {
        let store = Arc::new(MemoryStore::new());
        seed_microservice(&store, "m1", json!({})).await;
        store
            .delete::<MicroserviceConfiguration>(&ObjectKey::cluster("m1-default"))
            .await
            .unwrap();
        let ctx = Context::new(store.clone());

        let err = resolve_tenant(&ctx, &tenant("t1")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(err.is_retryable());
        assert_eq!(store.count::<TenantMicroservice>(), 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_pairings() {
        let store = Arc::new(MemoryStore::new());
        seed_microservice(&store, "m1", json!({})).await;
        seed_microservice(&store, "m2", json!({})).await;
        let template: MicroserviceConfiguration = store
            .get(&ObjectKey::cluster("m2-default"))
            .await
            .unwrap()
            .unwrap();
        store
            .delete::<MicroserviceConfiguration>(&ObjectKey::cluster("m2-default"))
            .await
            .unwrap();
        let ctx = Context::new(store.clone());

        assert!(resolve_tenant(&ctx, &tenant("t1")).await.is_err());
        assert_eq!(store.count::<TenantMicroservice>(), 1);

        let mut template = template;
        template.metadata.resource_version = None;
        store.create(&template).await.unwrap();
        assert_eq!(resolve_tenant(&ctx, &tenant("t1")).await.unwrap(), 1);
        assert_eq!(store.count::<TenantMicroservice>(), 2);
    }

    #[tokio::test]
    async fn test_create_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        seed_microservice(&store, "m1", json!({})).await;
        store.inject_failure::<TenantMicroservice>(StoreOp::Create);
        let ctx = Context::new(store.clone());

        let err = resolve_tenant(&ctx, &tenant("t1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(resolve_tenant(&ctx, &tenant("t1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_failure_aborts_without_writes() {
        let store = Arc::new(MemoryStore::new());
        seed_microservice(&store, "m1", json!({})).await;
        store.inject_failure::<Microservice>(StoreOp::List);
        let ctx = Context::new(store.clone());

        assert!(resolve_tenant(&ctx, &tenant("t1")).await.is_err());
        assert_eq!(store.count::<TenantMicroservice>(), 0);
    }

    #[tokio::test]
    async fn test_pairings_of_other_tenants_do_not_count() {
        let store = Arc::new(MemoryStore::new());
        seed_microservice(&store, "m1", json!({})).await;
        let ctx = Context::new(store.clone());

        assert_eq!(resolve_tenant(&ctx, &tenant("t1")).await.unwrap(), 1);
        assert_eq!(resolve_tenant(&ctx, &tenant("t2")).await.unwrap(), 1);
    }
}
