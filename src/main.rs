// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tracing::info;

use image_reflector::config::Config;
use image_reflector::kubernetes::wait_for_crds;
use image_reflector::reconcilers::{PolicyReconciler, RepositoryReconciler};
use image_reflector::registry::OciScanner;
use image_reflector::store::TagStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting image reflector");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: storage_path={}, watch_namespace={}",
        config.storage_path.display(),
        config.watch_namespace.as_deref().unwrap_or("<all>")
    );

    // Open the tag store before anything can be scanned
    let store = TagStore::open(&config.storage_path)
        .with_context(|| format!("opening tag store at {}", config.storage_path.display()))?;

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for image reflector CRDs to become available...");
    wait_for_crds(&client).await?;

    let scanner = Arc::new(OciScanner::new(config.insecure_registries.clone()));
    let repository_reconciler =
        RepositoryReconciler::new(client.clone(), store.clone(), scanner, config.clone());
    let policy_reconciler = PolicyReconciler::new(client, store.clone(), config);

    info!("Starting reconcilers...");

    // Both controllers stop on SIGTERM/ctrl-c; a tag store failure stops everything
    let result = tokio::try_join!(repository_reconciler.run(), policy_reconciler.run());

    store.close()?;
    result?;

    info!("Image reflector stopped");
    Ok(())
}
