//! Workloads and endpoints for pairings
//!
//! Every pairing runs as one Deployment and is reachable through one
//! ClusterIP Service, both named after the pairing. The pod carries the
//! identity of its instance, tenant and microservice in environment
//! variables and mounts the instance and tenant configuration bundles.
//!
//! Synthesis is existence-driven: when the Deployment is already there
//! nothing is compared or rewritten.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::Context;
use crate::crd::{Instance, Microservice, Tenant, TenantMicroservice};
use crate::naming;
use crate::store::{ensure_created, EntityStore, ObjectKey};
use crate::{Error, Result};

/// Instance id of the pod's instance
pub const ENV_INSTANCE_ID: &str = "DC_INSTANCE_ID";
/// Tenant id
pub const ENV_TENANT_ID: &str = "DC_TENANT_ID";
/// Tenant display name
pub const ENV_TENANT_NAME: &str = "DC_TENANT_NAME";
/// Microservice id
pub const ENV_MICROSERVICE_ID: &str = "DC_MICROSERVICE_ID";
/// Microservice display name
pub const ENV_MICROSERVICE_NAME: &str = "DC_MICROSERVICE_NAME";
/// Functional area of the microservice
pub const ENV_FUNCTIONAL_AREA: &str = "DC_MS_FUNCTIONAL_AREA";

const INSTANCE_CONFIG_VOLUME: &str = "instance-config";
const INSTANCE_CONFIG_MOUNT: &str = "/etc/dci-config";
const TENANT_CONFIG_VOLUME: &str = "tenant-config";
const TENANT_CONFIG_MOUNT: &str = "/etc/dct-config";
const HTTP_PORT_NAME: &str = "http";

/// Deployment and Service of one pairing
#[derive(Clone, Debug)]
pub struct PairingWorkload {
    /// The workload
    pub deployment: Deployment,
    /// The network endpoint
    pub service: Service,
}

impl PairingWorkload {
    /// Build the workload and endpoint for a tenant/microservice pair
    pub fn compile(instance: &Instance, tenant: &Tenant, microservice: &Microservice) -> Self {
        Self {
            deployment: build_deployment(instance, tenant, microservice),
            service: build_service(instance, tenant, microservice),
        }
    }
}

fn metadata(instance_id: &str, tenant_id: &str, microservice_id: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(naming::tenant_microservice_name(tenant_id, microservice_id)),
        namespace: Some(instance_id.to_string()),
        labels: Some(naming::managed_labels(tenant_id, microservice_id)),
        ..Default::default()
    }
}

fn env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

fn config_volume(volume: &str, config_map: String) -> Volume {
    Volume {
        name: volume.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn config_mount(volume: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Build the Deployment running a microservice for a tenant
pub fn build_deployment(
    instance: &Instance,
    tenant: &Tenant,
    microservice: &Microservice,
) -> Deployment {
    let instance_id = instance.name_any();
    let tenant_id = tenant.name_any();
    let ms_id = microservice.name_any();
    let selector = naming::pairing_labels(&tenant_id, &ms_id);

    let container = Container {
        name: ms_id.clone(),
        image: Some(microservice.spec.image.clone()),
        image_pull_policy: microservice.spec.image_pull_policy.clone(),
        ports: Some(vec![ContainerPort {
            name: Some(HTTP_PORT_NAME.to_string()),
            container_port: i32::from(naming::SERVICE_PORT),
            ..Default::default()
        }]),
        env: Some(vec![
            env(ENV_INSTANCE_ID, instance_id.clone()),
            env(ENV_TENANT_ID, tenant_id.clone()),
            env(ENV_TENANT_NAME, tenant.spec.name.clone()),
            env(ENV_MICROSERVICE_ID, ms_id.clone()),
            env(ENV_MICROSERVICE_NAME, microservice.spec.name.clone()),
            env(ENV_FUNCTIONAL_AREA, microservice.spec.functional_area.clone()),
        ]),
        volume_mounts: Some(vec![
            config_mount(INSTANCE_CONFIG_VOLUME, INSTANCE_CONFIG_MOUNT),
            config_mount(TENANT_CONFIG_VOLUME, TENANT_CONFIG_MOUNT),
        ]),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(&instance_id, &tenant_id, &ms_id),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![
                        config_volume(
                            INSTANCE_CONFIG_VOLUME,
                            naming::instance_bundle_name(&instance_id),
                        ),
                        config_volume(TENANT_CONFIG_VOLUME, naming::tenant_bundle_name(&tenant_id)),
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the ClusterIP Service exposing a pairing's pods
pub fn build_service(instance: &Instance, tenant: &Tenant, microservice: &Microservice) -> Service {
    let instance_id = instance.name_any();
    let tenant_id = tenant.name_any();
    let ms_id = microservice.name_any();
    let port = i32::from(naming::SERVICE_PORT);

    Service {
        metadata: metadata(&instance_id, &tenant_id, &ms_id),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(naming::pairing_labels(&tenant_id, &ms_id)),
            ports: Some(vec![ServicePort {
                name: Some(HTTP_PORT_NAME.to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// What [`synthesize`] found or did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Synthesis {
    /// The Deployment already existed; nothing was touched
    Existing,
    /// The Deployment was missing and the children were ensured
    Created,
}

/// Ensure the Deployment and Service of a pairing exist.
///
/// Missing tenant or microservice is an invariant violation. The Service is
/// ensured before the Deployment, so a Deployment never exists without its
/// Service and a failed run repeats cleanly.
pub async fn synthesize<S: EntityStore>(
    ctx: &Context<S>,
    pairing: &TenantMicroservice,
) -> Result<Synthesis> {
    let name = pairing.name_any();
    let namespace = pairing
        .namespace()
        .ok_or_else(|| Error::invariant(format!("pairing {} has no namespace", name)))?;
    let store = ctx.store.as_ref();

    let existing: Option<Deployment> = store
        .get(&ObjectKey::namespaced(namespace.as_str(), name.as_str()))
        .await?;
    if existing.is_some() {
        debug!(pairing = %name, "deployment exists, leaving it as is");
        return Ok(Synthesis::Existing);
    }

    let tenant: Tenant = store
        .get(&ObjectKey::namespaced(namespace.as_str(), pairing.spec.tenant_id.as_str()))
        .await?
        .ok_or_else(|| {
            Error::invariant(format!(
                "pairing {} references missing tenant {}",
                name, pairing.spec.tenant_id
            ))
        })?;
    let microservice: Microservice = store
        .get(&ObjectKey::namespaced(
            namespace.as_str(),
            pairing.spec.microservice_id.as_str(),
        ))
        .await?
        .ok_or_else(|| {
            Error::invariant(format!(
                "pairing {} references missing microservice {}",
                name, pairing.spec.microservice_id
            ))
        })?;
    let instance: Instance = store
        .get(&ObjectKey::cluster(namespace.as_str()))
        .await?
        .ok_or_else(|| {
            Error::invariant(format!(
                "pairing {} lives in namespace {} without an instance",
                name, namespace
            ))
        })?;

    let workload = PairingWorkload::compile(&instance, &tenant, &microservice);
    let service_created = ensure_created(store, &workload.service).await?;
    let deployment_created = ensure_created(store, &workload.deployment).await?;

    info!(
        pairing = %name,
        service_created,
        deployment_created,
        "synthesized pairing workload"
    );
    Ok(Synthesis::Created)
}
