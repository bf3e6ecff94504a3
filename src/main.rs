//! dc-operator - converges devicechain instances, tenants and microservices

use std::sync::Arc;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dc_operator::config::OperatorConfig;
use dc_operator::controller::{Context, Operator};
use dc_operator::dispatch::{watch_requests, Dispatcher};
use dc_operator::manifests;
use dc_operator::store::KubeStore;
use dc_operator::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    if config.crd {
        print!("{}", manifests::crd_manifests()?);
        return Ok(());
    }

    init_telemetry(&config.telemetry())?;

    let client = build_client(&config).await?;
    let store =
        Arc::new(KubeStore::new(client.clone()).with_field_manager(&config.field_manager));
    let ctx = Arc::new(Context::with_settings(store, config.settings()));
    let operator = Arc::new(Operator::new(ctx));
    let dispatcher = Arc::new(Dispatcher::new(operator, config.retry()));

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    info!(
        ingress_class = ?config.ingress_class,
        max_conflict_retries = config.max_conflict_retries,
        "starting dc-operator"
    );
    dispatcher.run(watch_requests(client), cancel).await;
    info!("dc-operator stopped");

    Ok(())
}

/// Build a client from an explicit kubeconfig, or from the environment
async fn build_client(config: &OperatorConfig) -> anyhow::Result<Client> {
    let Some(path) = &config.kubeconfig else {
        return Ok(Client::try_default().await?);
    };
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| anyhow::anyhow!("Failed to read kubeconfig {:?}: {}", path, e))?;
    let client_config =
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(client_config)?)
}

/// Cancel `cancel` on SIGINT or SIGTERM
async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    cancel.cancel();
}
