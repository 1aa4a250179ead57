// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use templated_secret_controller::config::Config;
use templated_secret_controller::constants::CONTROLLER_NAME;
use templated_secret_controller::kubernetes::{
    wait_for_secret_template_crd, KubeTokenApi, LeaderElector, ServiceAccountLoader, TokenManager,
};
use templated_secret_controller::reconcilers::{ReconcileSettings, SecretTemplateReconciler};
use templated_secret_controller::tracker::Tracker;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize tracing; RUST_LOG overrides the --log-level default
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Starting {} {}", CONTROLLER_NAME, env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: reconciliation_interval={:?} max_secret_age={:?} metrics_bind_address={}",
        config.reconciliation_interval, config.max_secret_age, config.metrics_bind_address
    );

    // Create Kubernetes client
    let kube_config = kube::Config::infer().await?;
    let client = Client::try_from(kube_config.clone())?;
    info!("Connected to Kubernetes cluster");

    // Wait for the SecretTemplate CRD before starting controllers
    info!("Waiting for SecretTemplate CRD to become available...");
    wait_for_secret_template_crd(&client).await?;

    // With leader election enabled, block until this replica holds the lease
    let leader_guard = if config.leader_elect {
        let namespace = kube_config.default_namespace.clone();
        let identity = std::env::var("HOSTNAME")
            .unwrap_or_else(|_| format!("{}-{}", CONTROLLER_NAME, std::process::id()));
        let elector =
            LeaderElector::new(client.clone(), &config.leader_election_id, &namespace, &identity);
        Some(elector.acquire().await?)
    } else {
        None
    };

    let token_manager = Arc::new(TokenManager::new(Box::new(KubeTokenApi::new(client.clone()))));
    token_manager.spawn_gc();

    let loader = Arc::new(ServiceAccountLoader::new(
        Arc::clone(&token_manager),
        kube_config,
    ));
    let tracker = Arc::new(Tracker::new());
    let settings = ReconcileSettings {
        reconciliation_interval: config.reconciliation_interval,
        max_secret_age: config.max_secret_age,
    };

    // One controller per watched namespace, or a single cluster-wide one
    let namespaces = config.namespaces();
    let scopes: Vec<Option<String>> = if namespaces.is_empty() {
        info!("Watching SecretTemplates in all namespaces");
        vec![None]
    } else {
        info!("Watching SecretTemplates in namespaces: {:?}", namespaces);
        namespaces.into_iter().map(Some).collect()
    };

    info!("Starting controllers...");
    let handles: Vec<_> = scopes
        .into_iter()
        .map(|scope| {
            let reconciler = Arc::new(SecretTemplateReconciler::new(
                client.clone(),
                loader.clone(),
                tracker.clone(),
                settings.clone(),
            ));
            tokio::spawn(reconciler.run(scope))
        })
        .collect();
    let controllers = futures::future::try_join_all(handles);

    match leader_guard {
        Some(guard) => {
            tokio::select! {
                results = controllers => {
                    for result in results? {
                        result?;
                    }
                }
                _ = guard.lost() => {
                    anyhow::bail!("leader election lease lost");
                }
            }
        }
        None => {
            for result in controllers.await? {
                result?;
            }
        }
    }

    // This should never be reached as the controllers run forever
    warn!("All controllers stopped unexpectedly");
    Ok(())
}
