//! Custom Resource Definitions for the operator
//!
//! This module contains all CRD definitions watched by the operator.

mod instance;
mod microservice;
mod tenant;
mod types;

pub use instance::{Instance, InstanceConfiguration, InstanceConfigurationSpec, InstanceSpec};
pub use microservice::{
    Microservice, MicroserviceConfiguration, MicroserviceConfigurationSpec, MicroserviceSpec,
};
pub use tenant::{Tenant, TenantMicroservice, TenantMicroserviceSpec, TenantSpec};
pub use types::EntityConfiguration;
