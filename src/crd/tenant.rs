//! Tenant and TenantMicroservice Custom Resource Definitions

use std::collections::BTreeMap;

use kube::api::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::EntityConfiguration;
use crate::naming;

/// Specification for a Tenant
///
/// Tenants live in the namespace of the instance they belong to.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.devicechain.io",
    version = "v1beta1",
    kind = "Tenant",
    plural = "tenants",
    shortname = "dct",
    namespaced,
    printcolumn = r#"{"name":"Name","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Human-readable name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

/// Specification for a TenantMicroservice (pairing)
///
/// Pairings are materialized by the operator, one per (tenant, microservice)
/// in an instance. The configuration is copied from the microservice's
/// template when the pairing is created and never re-synced afterwards.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.devicechain.io",
    version = "v1beta1",
    kind = "TenantMicroservice",
    plural = "tenantmicroservices",
    shortname = "dctm",
    namespaced,
    printcolumn = r#"{"name":"Tenant","type":"string","jsonPath":".spec.tenantId"}"#,
    printcolumn = r#"{"name":"Microservice","type":"string","jsonPath":".spec.microserviceId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantMicroserviceSpec {
    /// Microservice id
    pub microservice_id: String,

    /// Tenant id
    pub tenant_id: String,

    /// Tenant-specific microservice configuration
    #[serde(default)]
    pub configuration: EntityConfiguration,
}

impl TenantMicroserviceSpec {
    /// Validate the pairing specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.tenant_id.is_empty() || self.microservice_id.is_empty() {
            return Err(crate::Error::validation(
                "tenantmicroservice requires both tenantId and microserviceId",
            ));
        }
        Ok(())
    }
}

impl TenantMicroservice {
    /// Build the pairing for a tenant and microservice in an instance
    ///
    /// Name and labels are derived from the ids, so two builders for the same
    /// pair produce objects that collide on create.
    pub fn for_pair(
        instance_id: &str,
        tenant_id: &str,
        microservice_id: &str,
        configuration: EntityConfiguration,
    ) -> Self {
        let labels: BTreeMap<String, String> = naming::managed_labels(tenant_id, microservice_id);
        Self {
            metadata: ObjectMeta {
                name: Some(naming::tenant_microservice_name(tenant_id, microservice_id)),
                namespace: Some(instance_id.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: TenantMicroserviceSpec {
                microservice_id: microservice_id.to_string(),
                tenant_id: tenant_id.to_string(),
                configuration,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_pairing_has_deterministic_name_and_labels() {
        let tms = TenantMicroservice::for_pair("dc1", "t1", "m1", EntityConfiguration::default());
        assert_eq!(tms.name_any(), "tms-t1-m1");
        assert_eq!(tms.namespace().as_deref(), Some("dc1"));
        assert_eq!(tms.labels()[naming::LABEL_TENANT], "t1");
        assert_eq!(tms.labels()[naming::LABEL_MICROSERVICE], "m1");
        assert!(tms.spec.validate().is_ok());
    }

    #[test]
    fn test_pairing_requires_both_ids() {
        let spec = TenantMicroserviceSpec {
            microservice_id: String::new(),
            tenant_id: "t1".to_string(),
            configuration: EntityConfiguration::default(),
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_pairing_spec_field_names() {
        let tms = TenantMicroservice::for_pair(
            "dc1",
            "t1",
            "m1",
            EntityConfiguration::new(serde_json::json!({"k": "v"})),
        );
        let value = serde_json::to_value(&tms.spec).unwrap();
        assert_eq!(value["tenantId"], "t1");
        assert_eq!(value["microserviceId"], "m1");
        assert_eq!(value["configuration"]["k"], "v");
    }
}
