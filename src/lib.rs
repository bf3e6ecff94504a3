//! dc-operator - multi-tenant workload orchestration for devicechain
//!
//! The operator watches a hierarchy of declared entities, an Instance with
//! its Tenants and Microservices, and converges the cluster towards it:
//! every tenant is paired with every microservice of its instance, and
//! every pairing runs as a Deployment behind a Service, with an entry in
//! the tenant's configuration bundle and a path in the tenant's Ingress.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Instance, Tenant, Microservice, ...)
//! - [`store`] - Typed entity store over the Kubernetes API, plus an in-memory store
//! - [`controller`] - Per-kind reconcilers, pairing matrix and cascading teardown
//! - [`bundle`] - Instance and tenant configuration bundles
//! - [`workload`] - Deployment and Service of a pairing
//! - [`ingress`] - Tenant routing tables
//! - [`manifests`] - CRD and configuration template YAML
//! - [`dispatch`] - Watchers, per-entity serialization and retries
//! - [`config`] - Command-line and environment configuration
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod bundle;
pub mod config;
pub mod controller;
pub mod crd;
pub mod dispatch;
pub mod error;
pub mod ingress;
pub mod manifests;
pub mod naming;
pub mod pairing;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
