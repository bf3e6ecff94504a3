//! Deterministic names, label keys and well-known constants
//!
//! Every derived object is addressed by a name computed from the ids of the
//! entities it belongs to. These formats are shared with any other process
//! that reads the same cluster state, so they must not change.

use std::collections::BTreeMap;

/// Label carrying the tenant id on pairings, workloads and endpoints
pub const LABEL_TENANT: &str = "devicechain.io/tenant";

/// Label carrying the microservice id on pairings, workloads and endpoints
pub const LABEL_MICROSERVICE: &str = "devicechain.io/microservice";

/// Label marking objects created by this operator
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY: &str = "dc-operator";

/// Key of the single entry in an instance configuration bundle
pub const INSTANCE_CONFIG_KEY: &str = "instance";

/// Port every microservice listens on and every endpoint exposes
pub const SERVICE_PORT: u16 = 8080;

/// Rewrite applied by the routing layer to every tenant path
pub const REWRITE_TARGET: &str = "/$2";

/// Name of the instance configuration bundle: `dci-{instanceId}-config`
pub fn instance_bundle_name(instance_id: &str) -> String {
    format!("dci-{}-config", instance_id)
}

/// Name of the tenant configuration bundle: `dct-{tenantId}-config`
pub fn tenant_bundle_name(tenant_id: &str) -> String {
    format!("dct-{}-config", tenant_id)
}

/// Name of a pairing: `tms-{tenantId}-{microserviceId}`
///
/// The workload and endpoint of the pairing share this name.
pub fn tenant_microservice_name(tenant_id: &str, microservice_id: &str) -> String {
    format!("tms-{}-{}", tenant_id, microservice_id)
}

/// Name of a tenant's routing table: `{instance}-{tenantId}-ingress`
pub fn routing_table_name(instance_id: &str, tenant_id: &str) -> String {
    format!("{}-{}-ingress", instance_id, tenant_id)
}

/// Routing path of one pairing: `/{instance}/{tenantId}/{functionalArea}(/|$)(.*)`
pub fn routing_path(instance_id: &str, tenant_id: &str, functional_area: &str) -> String {
    format!("/{}/{}/{}(/|$)(.*)", instance_id, tenant_id, functional_area)
}

/// Exact-match selector for every pairing of a tenant
pub fn tenant_selector(tenant_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_TENANT.to_string(), tenant_id.to_string())])
}

/// Exact-match selector for every pairing of a microservice
pub fn microservice_selector(microservice_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_MICROSERVICE.to_string(), microservice_id.to_string())])
}

/// Label pair identifying a pairing's pods
pub fn pairing_labels(tenant_id: &str, microservice_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_TENANT.to_string(), tenant_id.to_string()),
        (LABEL_MICROSERVICE.to_string(), microservice_id.to_string()),
    ])
}

/// Pairing labels plus the managed-by marker, for object metadata
pub fn managed_labels(tenant_id: &str, microservice_id: &str) -> BTreeMap<String, String> {
    let mut labels = pairing_labels(tenant_id, microservice_id);
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_names() {
        assert_eq!(instance_bundle_name("dc1"), "dci-dc1-config");
        assert_eq!(tenant_bundle_name("acme"), "dct-acme-config");
    }

    #[test]
    fn test_pairing_name_is_deterministic() {
        assert_eq!(tenant_microservice_name("t1", "m1"), "tms-t1-m1");
        assert_eq!(
            tenant_microservice_name("t1", "m1"),
            tenant_microservice_name("t1", "m1")
        );
    }

    #[test]
    fn test_routing_names() {
        assert_eq!(routing_table_name("dc1", "acme"), "dc1-acme-ingress");
        assert_eq!(
            routing_path("dc1", "acme", "device-management"),
            "/dc1/acme/device-management(/|$)(.*)"
        );
    }

    #[test]
    fn test_selectors() {
        let labels = pairing_labels("t1", "m1");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[LABEL_TENANT], "t1");
        assert_eq!(labels[LABEL_MICROSERVICE], "m1");

        assert_eq!(tenant_selector("t1")[LABEL_TENANT], "t1");
        assert_eq!(microservice_selector("m1")[LABEL_MICROSERVICE], "m1");
        assert_eq!(managed_labels("t1", "m1")[LABEL_MANAGED_BY], MANAGED_BY);
    }
}
