//! Configuration bundles
//!
//! An instance bundle (`dci-{instance}-config`) holds the resolved instance
//! configuration under a single `instance` key and is written once. A tenant
//! bundle (`dct-{tenant}-config`) holds one entry per functional area, each
//! the JSON text of the configuration of the tenant's pairing in that area.
//! Tenant bundles are shared by every pairing of the tenant, so all writes go
//! through [`upsert_with_retry`] and survive concurrent writers.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::controller::Context;
use crate::crd::EntityConfiguration;
use crate::naming;
use crate::pairing::ResolvedPairing;
use crate::store::{ensure_created, upsert_with_retry, EntityStore, ObjectKey, WriteOutcome};
use crate::Result;

fn bundle(namespace: &str, name: String, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                naming::LABEL_MANAGED_BY.to_string(),
                naming::MANAGED_BY.to_string(),
            )])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Key of a tenant's bundle
pub fn tenant_bundle_key(namespace: &str, tenant_id: &str) -> ObjectKey {
    ObjectKey::namespaced(namespace, naming::tenant_bundle_name(tenant_id))
}

/// Build the instance bundle for a resolved instance configuration
pub fn instance_bundle(
    instance_id: &str,
    configuration: &EntityConfiguration,
) -> Result<ConfigMap> {
    Ok(bundle(
        instance_id,
        naming::instance_bundle_name(instance_id),
        BTreeMap::from([(
            naming::INSTANCE_CONFIG_KEY.to_string(),
            configuration.to_bundle_entry()?,
        )]),
    ))
}

/// Create the instance bundle unless it already exists.
///
/// An existing bundle is left as it is, even if the template changed since.
pub async fn ensure_instance_bundle<S: EntityStore>(
    ctx: &Context<S>,
    instance_id: &str,
    configuration: &EntityConfiguration,
) -> Result<WriteOutcome> {
    let cm = instance_bundle(instance_id, configuration)?;
    if ensure_created(ctx.store.as_ref(), &cm).await? {
        info!(instance = %instance_id, "created instance configuration bundle");
        Ok(WriteOutcome::Created)
    } else {
        Ok(WriteOutcome::Unchanged)
    }
}

/// Set the entry for `functional_area` in a tenant's bundle.
///
/// The bundle is created on first use. Entries for other areas are kept, and
/// a bundle that already holds the same text is not rewritten.
pub async fn apply_tenant_entry<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    tenant_id: &str,
    functional_area: &str,
    configuration: &EntityConfiguration,
) -> Result<WriteOutcome> {
    let entry = configuration.to_bundle_entry()?;
    let key = tenant_bundle_key(namespace, tenant_id);

    let outcome = upsert_with_retry(
        ctx.store.as_ref(),
        &key,
        ctx.write_attempts(),
        |current: Option<&ConfigMap>| {
            let mut cm = match current {
                Some(cm) => cm.clone(),
                None => bundle(namespace, key.name.clone(), BTreeMap::new()),
            };
            let data = cm.data.get_or_insert_with(BTreeMap::new);
            if data.get(functional_area) == Some(&entry) {
                return Ok(None);
            }
            data.insert(functional_area.to_string(), entry.clone());
            Ok(Some(cm))
        },
    )
    .await?;

    debug!(
        tenant = %tenant_id,
        functional_area = %functional_area,
        ?outcome,
        "applied tenant bundle entry"
    );
    Ok(outcome)
}

/// Entry text per functional area, one candidate per pairing in name order
fn area_entries(pairings: &[ResolvedPairing]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for p in pairings {
        entries
            .entry(p.functional_area.clone())
            .or_default()
            .push(p.pairing.spec.configuration.to_bundle_entry()?);
    }
    Ok(entries)
}

/// Bring an existing tenant bundle in line with the tenant's live pairings.
///
/// Areas no pairing serves any more are dropped. An area whose entry no
/// longer matches the configuration of any live pairing in it, or that has no
/// entry yet, gets the configuration of the first such pairing by name.
/// Entries that still match a live pairing are kept as written. A missing
/// bundle is left missing.
pub async fn sync_tenant_bundle<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    tenant_id: &str,
    pairings: &[ResolvedPairing],
) -> Result<WriteOutcome> {
    let key = tenant_bundle_key(namespace, tenant_id);
    let wanted = area_entries(pairings)?;

    let outcome = upsert_with_retry(
        ctx.store.as_ref(),
        &key,
        ctx.write_attempts(),
        |current: Option<&ConfigMap>| {
            let Some(current) = current else {
                return Ok(None);
            };
            let mut cm = current.clone();
            let data = cm.data.get_or_insert_with(BTreeMap::new);
            let before = data.clone();
            data.retain(|area, _| wanted.contains_key(area));
            for (area, candidates) in &wanted {
                let live = data.get(area).is_some_and(|entry| candidates.contains(entry));
                if !live {
                    if let Some(first) = candidates.first() {
                        data.insert(area.clone(), first.clone());
                    }
                }
            }
            if *data == before {
                return Ok(None);
            }
            Ok(Some(cm))
        },
    )
    .await?;

    if outcome == WriteOutcome::Updated {
        info!(tenant = %tenant_id, "synced tenant bundle");
    }
    Ok(outcome)
}

/// Delete a tenant's bundle
pub async fn delete_tenant_bundle<S: EntityStore>(
    ctx: &Context<S>,
    namespace: &str,
    tenant_id: &str,
) -> Result<WriteOutcome> {
    let key = tenant_bundle_key(namespace, tenant_id);
    if ctx.store.delete::<ConfigMap>(&key).await? {
        info!(tenant = %tenant_id, "deleted tenant bundle");
        Ok(WriteOutcome::Deleted)
    } else {
        debug!(tenant = %tenant_id, "tenant bundle already gone");
        Ok(WriteOutcome::Unchanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::TenantMicroservice;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    const DEFAULT_RETRIES: u32 = crate::controller::DEFAULT_MAX_CONFLICT_RETRIES;

    fn ctx() -> (Arc<MemoryStore>, Context<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Context::new(store))
    }

    async fn tenant_data(store: &MemoryStore) -> BTreeMap<String, String> {
        let cm: ConfigMap = store
            .get(&tenant_bundle_key("dc1", "t1"))
            .await
            .unwrap()
            .unwrap();
        cm.data.unwrap_or_default()
    }

    fn config(value: serde_json::Value) -> EntityConfiguration {
        EntityConfiguration::new(value)
    }

    /// Story: every pairing contributes one entry keyed by its functional area
    ///
    /// Two pairings in areas a and b produce {a: P1, b: P2}. A third pairing in
    /// area a overwrites only a.
    #[tokio::test]
    async fn story_entries_are_keyed_by_functional_area() {
        let (store, ctx) = ctx();

        let outcome = apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({"p": 1})))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        apply_tenant_entry(&ctx, "dc1", "t1", "b", &config(json!({"p": 2})))
            .await
            .unwrap();

        let data = tenant_data(&store).await;
        assert_eq!(data.len(), 2);
        assert_eq!(data["a"], r#"{"p":1}"#);
        assert_eq!(data["b"], r#"{"p":2}"#);

        apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({"p": 3})))
            .await
            .unwrap();
        let data = tenant_data(&store).await;
        assert_eq!(data["a"], r#"{"p":3}"#);
        assert_eq!(data["b"], r#"{"p":2}"#);
    }

    #[tokio::test]
    async fn test_matching_entry_is_not_rewritten() {
        let (store, ctx) = ctx();
        apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({"p": 1})))
            .await
            .unwrap();

        // A pending conflict would surface if an update were attempted
        store.inject_conflicts::<ConfigMap>(10);
        let outcome = apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({"p": 1})))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_conflicts_are_reapplied_until_the_limit() {
        let (store, ctx) = ctx();
        apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({"p": 1})))
            .await
            .unwrap();

        store.inject_conflicts::<ConfigMap>(DEFAULT_RETRIES as usize);
        let outcome = apply_tenant_entry(&ctx, "dc1", "t1", "b", &config(json!({"p": 2})))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);

        store.inject_conflicts::<ConfigMap>(DEFAULT_RETRIES as usize + 1);
        let err = apply_tenant_entry(&ctx, "dc1", "t1", "c", &config(json!({"p": 3})))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(!tenant_data(&store).await.contains_key("c"));
    }

    fn resolved(tenant: &str, ms: &str, area: &str, value: serde_json::Value) -> ResolvedPairing {
        ResolvedPairing {
            pairing: TenantMicroservice::for_pair("dc1", tenant, ms, config(value)),
            functional_area: area.to_string(),
        }
    }

    #[tokio::test]
    async fn test_sync_keeps_only_live_areas() {
        let (store, ctx) = ctx();
        for area in ["a", "b", "c"] {
            apply_tenant_entry(&ctx, "dc1", "t1", area, &config(json!({})))
                .await
                .unwrap();
        }

        let live = vec![
            resolved("t1", "m1", "a", json!({})),
            resolved("t1", "m3", "c", json!({})),
        ];
        let outcome = sync_tenant_bundle(&ctx, "dc1", "t1", &live).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);
        let keys: Vec<_> = tenant_data(&store).await.into_keys().collect();
        assert_eq!(keys, vec!["a", "c"]);

        let outcome = sync_tenant_bundle(&ctx, "dc1", "t1", &live).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
    }

    /// Story: a shared area falls back to a surviving pairing
    ///
    /// m1 and m2 both serve area a and m2 wrote last. Once m2 is gone its
    /// payload has no owner, so the entry switches to m1's configuration.
    #[tokio::test]
    async fn story_shared_area_falls_back_to_the_survivor() {
        let (store, ctx) = ctx();
        apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({"from": "m1"})))
            .await
            .unwrap();
        apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({"from": "m2"})))
            .await
            .unwrap();

        // Both pairings still live: the last writer stays
        let both = vec![
            resolved("t1", "m1", "a", json!({"from": "m1"})),
            resolved("t1", "m2", "a", json!({"from": "m2"})),
        ];
        let outcome = sync_tenant_bundle(&ctx, "dc1", "t1", &both).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(tenant_data(&store).await["a"], r#"{"from":"m2"}"#);

        let survivor = vec![resolved("t1", "m1", "a", json!({"from": "m1"}))];
        let outcome = sync_tenant_bundle(&ctx, "dc1", "t1", &survivor)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);
        assert_eq!(tenant_data(&store).await["a"], r#"{"from":"m1"}"#);
    }

    #[tokio::test]
    async fn test_sync_fills_in_a_moved_area() {
        let (store, ctx) = ctx();
        apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({"p": 1})))
            .await
            .unwrap();

        let moved = vec![resolved("t1", "m1", "z", json!({"p": 1}))];
        sync_tenant_bundle(&ctx, "dc1", "t1", &moved).await.unwrap();

        let data = tenant_data(&store).await;
        assert_eq!(data.len(), 1);
        assert_eq!(data["z"], r#"{"p":1}"#);
    }

    #[tokio::test]
    async fn test_sync_of_missing_bundle_creates_nothing() {
        let (store, ctx) = ctx();
        let live = vec![resolved("t1", "m1", "a", json!({}))];
        let outcome = sync_tenant_bundle(&ctx, "dc1", "t1", &live).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(store.count::<ConfigMap>(), 0);
    }

    #[tokio::test]
    async fn test_instance_bundle_is_written_once() {
        let (store, ctx) = ctx();
        let first = config(json!({"mqtt": {"port": 1883}}));

        let outcome = ensure_instance_bundle(&ctx, "dc1", &first).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        let outcome = ensure_instance_bundle(&ctx, "dc1", &config(json!({})))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);

        let cm: ConfigMap = store
            .get(&ObjectKey::namespaced("dc1", "dci-dc1-config"))
            .await
            .unwrap()
            .unwrap();
        let data = cm.data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[naming::INSTANCE_CONFIG_KEY], r#"{"mqtt":{"port":1883}}"#);
    }

    #[tokio::test]
    async fn test_delete_tenant_bundle_is_idempotent() {
        let (_, ctx) = ctx();
        apply_tenant_entry(&ctx, "dc1", "t1", "a", &config(json!({})))
            .await
            .unwrap();

        assert_eq!(
            delete_tenant_bundle(&ctx, "dc1", "t1").await.unwrap(),
            WriteOutcome::Deleted
        );
        assert_eq!(
            delete_tenant_bundle(&ctx, "dc1", "t1").await.unwrap(),
            WriteOutcome::Unchanged
        );
    }
}
