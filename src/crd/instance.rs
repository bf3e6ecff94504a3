//! Instance and InstanceConfiguration Custom Resource Definitions
//!
//! An Instance is the top-level deployment unit. Its name is the instance id
//! and doubles as the name of the namespace that isolates everything the
//! instance owns.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::EntityConfiguration;

/// Specification for an Instance
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.devicechain.io",
    version = "v1beta1",
    kind = "Instance",
    plural = "instances",
    shortname = "dci",
    namespaced = false,
    printcolumn = r#"{"name":"Name","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Config","type":"string","jsonPath":".spec.configurationId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Human-readable name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Name of the InstanceConfiguration resolved into the instance bundle
    pub configuration_id: String,
}

impl InstanceSpec {
    /// Validate the instance specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.configuration_id.trim().is_empty() {
            return Err(crate::Error::validation(
                "instance configurationId must not be empty",
            ));
        }
        Ok(())
    }
}

/// Specification for an InstanceConfiguration template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.devicechain.io",
    version = "v1beta1",
    kind = "InstanceConfiguration",
    plural = "instanceconfigurations",
    shortname = "dcic",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfigurationSpec {
    /// Opaque configuration document
    #[serde(default)]
    pub configuration: EntityConfiguration,
}
