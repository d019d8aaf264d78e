//! `ulgate run`: start the gateway and serve until a shutdown signal.

use std::sync::Arc;

use tracing::{error, info, warn};

use ulgate_core::{Agent, MemoryRegistry};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let config = super::load_config(global)?;
    let agent_config = config.agent_config()?;

    let registry = Arc::new(MemoryRegistry::new());
    for group in config.groups() {
        registry.upsert_group(group);
    }

    let agent = Agent::start(agent_config, registry.clone())
        .await
        .map_err(|source| CliError::Startup { source })?;

    // Static devices take the same path as runtime provisioning so their
    // bidirectional attributes get broker subscriptions.
    for device in config.devices() {
        let device_id = device.id.clone();
        if let Err(e) = agent.provision_device(device).await {
            warn!(%device_id, error = %e, "static device not provisioned");
        }
    }

    info!(
        groups = registry.group_count(),
        devices = registry.len(),
        "gateway ready"
    );

    shutdown_signal().await;
    agent.shutdown().await;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!(signal = "SIGINT", "shutting down"),
        () = terminate => info!(signal = "SIGTERM", "shutting down"),
    }
}
