//! YAML manifests for installing the operator's resources
//!
//! The CRDs are printed by `dc-operator --crd`. Configuration templates are
//! rendered by whatever packages an instance or a microservice, so the
//! operator can resolve them later.

use kube::CustomResourceExt;
use serde::Serialize;

use crate::crd::{
    EntityConfiguration, Instance, InstanceConfiguration, InstanceConfigurationSpec,
    Microservice, MicroserviceConfiguration, MicroserviceConfigurationSpec, Tenant,
    TenantMicroservice,
};
use crate::{Error, Result};

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| Error::serialization(e.to_string()))
}

/// Every CRD the operator watches, as one multi-document YAML stream
pub fn crd_manifests() -> Result<String> {
    let crds = [
        Instance::crd(),
        InstanceConfiguration::crd(),
        Microservice::crd(),
        MicroserviceConfiguration::crd(),
        Tenant::crd(),
        TenantMicroservice::crd(),
    ];
    let docs = crds.iter().map(to_yaml).collect::<Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}

/// Render an InstanceConfiguration template named `id`
pub fn instance_configuration(id: &str, content: serde_json::Value) -> Result<String> {
    to_yaml(&InstanceConfiguration::new(
        id,
        InstanceConfigurationSpec {
            configuration: EntityConfiguration::new(content),
        },
    ))
}

/// Render a MicroserviceConfiguration template named `id`
pub fn microservice_configuration(
    id: &str,
    functional_area: &str,
    image: &str,
    content: serde_json::Value,
) -> Result<String> {
    to_yaml(&MicroserviceConfiguration::new(
        id,
        MicroserviceConfigurationSpec {
            functional_area: functional_area.to_string(),
            image: image.to_string(),
            configuration: EntityConfiguration::new(content),
        },
    ))
}
