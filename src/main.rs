// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use appgroup_controller::config::Config;
use appgroup_controller::controllers::AppController;
use appgroup_controller::kubernetes::wait_for_appgroup_crd;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting AppGroup controller");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: namespace={}, workers={}",
        config.watch_namespace, config.worker_count
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for AppGroup CRD to become available...");
    wait_for_appgroup_crd(&client).await?;

    let token = CancellationToken::new();
    let shutdown = token.clone();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        shutdown.cancel();
    });

    AppController::new(client, config).run(token).await?;

    warn!("AppGroup controller stopped");
    Ok(())
}
