//! Operator configuration
//!
//! Every flag can also be set through a `DC_*` environment variable, which
//! is how the operator's own Deployment configures it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::controller::{Settings, DEFAULT_MAX_CONFLICT_RETRIES};
use crate::retry::RetryConfig;
use crate::telemetry::{LogFormat, TelemetryConfig};

/// dc-operator - converges devicechain instances, tenants and microservices
#[derive(Parser, Debug, Clone)]
#[command(name = "dc-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Print the CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Path to a kubeconfig file; in-cluster or default config when unset
    #[arg(long, env = "DC_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "DC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Log filter directives, used when RUST_LOG is unset
    #[arg(long, env = "DC_LOG_FILTER")]
    pub log_filter: Option<String>,

    /// Initial delay before retrying a failed reconcile, in milliseconds
    #[arg(long, env = "DC_RETRY_INITIAL_MS", default_value_t = 500)]
    pub retry_initial_ms: u64,

    /// Maximum delay between reconcile retries, in seconds
    #[arg(long, env = "DC_RETRY_MAX_SECS", default_value_t = 60)]
    pub retry_max_secs: u64,

    /// Attempts per reconcile request before it is abandoned (0 = unlimited)
    #[arg(long, env = "DC_RETRY_MAX_ATTEMPTS", default_value_t = 0)]
    pub retry_max_attempts: u32,

    /// How often a conflicting bundle or routing write is re-read and reapplied
    #[arg(long, env = "DC_MAX_CONFLICT_RETRIES", default_value_t = DEFAULT_MAX_CONFLICT_RETRIES)]
    pub max_conflict_retries: u32,

    /// ingressClassName set on tenant routing tables
    #[arg(long, env = "DC_INGRESS_CLASS")]
    pub ingress_class: Option<String>,

    /// Field manager recorded on every write
    #[arg(long, env = "DC_FIELD_MANAGER", default_value = "dc-operator")]
    pub field_manager: String,
}

impl OperatorConfig {
    /// Reconciler settings
    pub fn settings(&self) -> Settings {
        Settings {
            ingress_class: self.ingress_class.clone().filter(|c| !c.is_empty()),
            max_conflict_retries: self.max_conflict_retries,
        }
    }

    /// Backoff for failed reconciles
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_ms),
            max_delay: Duration::from_secs(self.retry_max_secs),
            ..Default::default()
        }
    }

    /// Logging setup
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            format: self.log_format,
            filter: self.log_filter.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::try_parse_from(["dc-operator"]).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.field_manager, "dc-operator");
        assert!(!config.crd);

        let settings = config.settings();
        assert_eq!(settings.max_conflict_retries, 5);
        assert!(settings.ingress_class.is_none());

        let retry = config.retry();
        assert_eq!(retry.max_attempts, 0);
        assert_eq!(retry.initial_delay, Duration::from_millis(500));
        assert_eq!(retry.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = OperatorConfig::try_parse_from([
            "dc-operator",
            "--log-format",
            "pretty",
            "--ingress-class",
            "nginx",
            "--max-conflict-retries",
            "2",
            "--retry-max-attempts",
            "10",
        ])
        .unwrap();

        assert_eq!(config.telemetry().format, LogFormat::Pretty);
        assert_eq!(config.settings().ingress_class.as_deref(), Some("nginx"));
        assert_eq!(config.settings().max_conflict_retries, 2);
        assert_eq!(config.retry().max_attempts, 10);
    }

    #[test]
    fn test_crd_flag() {
        let config = OperatorConfig::try_parse_from(["dc-operator", "--crd"]).unwrap();
        assert!(config.crd);
    }

    #[test]
    fn test_empty_ingress_class_means_none() {
        let config =
            OperatorConfig::try_parse_from(["dc-operator", "--ingress-class", ""]).unwrap();
        assert!(config.settings().ingress_class.is_none());
    }
}
