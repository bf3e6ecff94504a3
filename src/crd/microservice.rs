//! Microservice and MicroserviceConfiguration Custom Resource Definitions

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::EntityConfiguration;

/// Specification for a Microservice
///
/// A Microservice lives in its instance's namespace and is paired with every
/// tenant of that instance.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.devicechain.io",
    version = "v1beta1",
    kind = "Microservice",
    plural = "microservices",
    shortname = "dcm",
    namespaced,
    printcolumn = r#"{"name":"Area","type":"string","jsonPath":".spec.functionalArea"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MicroserviceSpec {
    /// Human-readable name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Functional area; keys the tenant bundle entry and the routing path
    pub functional_area: String,

    /// Container image
    pub image: String,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Name of the MicroserviceConfiguration copied into new pairings
    #[serde(rename = "configId")]
    pub configuration_id: String,
}

impl MicroserviceSpec {
    /// Validate the microservice specification
    ///
    /// The functional area becomes a path segment and a ConfigMap key, so it
    /// must be non-empty and free of `/`.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.functional_area.is_empty() {
            return Err(crate::Error::validation(
                "microservice functionalArea must not be empty",
            ));
        }
        if !self
            .functional_area
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(crate::Error::validation(format!(
                "microservice functionalArea '{}' must contain only alphanumerics, '-', '_' or '.'",
                self.functional_area
            )));
        }
        if self.image.trim().is_empty() {
            return Err(crate::Error::validation("microservice image must not be empty"));
        }
        Ok(())
    }
}

/// Specification for a MicroserviceConfiguration template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.devicechain.io",
    version = "v1beta1",
    kind = "MicroserviceConfiguration",
    plural = "microserviceconfigurations",
    shortname = "dcmc",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct MicroserviceConfigurationSpec {
    /// Functional area the template was written for
    #[serde(default)]
    pub functional_area: String,

    /// Image the template was written for
    #[serde(default)]
    pub image: String,

    /// Opaque configuration document
    #[serde(default)]
    pub configuration: EntityConfiguration,
}
