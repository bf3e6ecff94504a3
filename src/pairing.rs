//! Pairing lookups shared by the routing table and the tenant bundle

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::warn;

use crate::crd::{Microservice, TenantMicroservice};
use crate::naming;
use crate::store::{EntityStore, ObjectKey};
use crate::Result;

/// A pairing together with the functional area of its microservice
#[derive(Clone, Debug)]
pub struct ResolvedPairing {
    /// The pairing
    pub pairing: TenantMicroservice,
    /// Functional area of the paired microservice
    pub functional_area: String,
}

impl ResolvedPairing {
    /// Name shared by the pairing, its workload and its endpoint
    pub fn name(&self) -> String {
        self.pairing.name_any()
    }
}

/// List the pairings of a tenant whose microservice still exists.
///
/// Pairings pointing at a missing microservice are skipped with a warning;
/// the microservice's own teardown removes them. Results are ordered by
/// pairing name.
pub async fn resolve_for_tenant<S: EntityStore + ?Sized>(
    store: &S,
    namespace: &str,
    tenant_id: &str,
) -> Result<Vec<ResolvedPairing>> {
    let pairings: Vec<TenantMicroservice> = store
        .list(Some(namespace), &naming::tenant_selector(tenant_id))
        .await?;

    let mut areas: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut resolved = Vec::with_capacity(pairings.len());
    for pairing in pairings {
        let ms_id = pairing.spec.microservice_id.clone();
        if !areas.contains_key(&ms_id) {
            let ms: Option<Microservice> = store
                .get(&ObjectKey::namespaced(namespace, ms_id.as_str()))
                .await?;
            areas.insert(ms_id.clone(), ms.map(|ms| ms.spec.functional_area));
        }
        match areas.get(&ms_id).cloned().flatten() {
            Some(functional_area) => resolved.push(ResolvedPairing {
                pairing,
                functional_area,
            }),
            None => warn!(
                pairing = %pairing.name_any(),
                microservice = %ms_id,
                "skipping pairing whose microservice no longer exists"
            ),
        }
    }

    resolved.sort_by_key(|p| p.name());
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{EntityConfiguration, MicroserviceSpec};
    use crate::store::MemoryStore;

    fn microservice(id: &str, area: &str) -> Microservice {
        let mut ms = Microservice::new(
            id,
            MicroserviceSpec {
                name: id.to_string(),
                description: String::new(),
                functional_area: area.to_string(),
                image: format!("devicechain/{}:1.0", id),
                image_pull_policy: None,
                configuration_id: format!("{}-default", id),
            },
        );
        ms.metadata.namespace = Some("dc1".to_string());
        ms
    }

    #[tokio::test]
    async fn test_resolves_areas_and_skips_orphans() {
        let store = MemoryStore::new();
        store.create(&microservice("m1", "a")).await.unwrap();
        store.create(&microservice("m2", "b")).await.unwrap();
        for (tenant, ms) in [("t1", "m1"), ("t1", "m2"), ("t1", "gone"), ("t2", "m1")] {
            store
                .create(&TenantMicroservice::for_pair(
                    "dc1",
                    tenant,
                    ms,
                    EntityConfiguration::default(),
                ))
                .await
                .unwrap();
        }

        let resolved = resolve_for_tenant(&store, "dc1", "t1").await.unwrap();
        let names: Vec<_> = resolved.iter().map(ResolvedPairing::name).collect();
        assert_eq!(names, vec!["tms-t1-m1", "tms-t1-m2"]);
        let areas: Vec<_> = resolved.iter().map(|p| p.functional_area.as_str()).collect();
        assert_eq!(areas, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_tenant_without_pairings_resolves_to_nothing() {
        let store = MemoryStore::new();
        let resolved = resolve_for_tenant(&store, "dc1", "t1").await.unwrap();
        assert!(resolved.is_empty());
    }
}
