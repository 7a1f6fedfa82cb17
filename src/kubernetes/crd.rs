// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::constants::{API_GROUP, API_VERSION};
use crate::error::Result;
use kube::{discovery::Discovery, Client};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Kinds served under the reflector API group
const KINDS: &[&str] = &["ImageRepository", "ImagePolicy"];

/// Wait for the ImageRepository and ImagePolicy CRDs to become available in the cluster.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_crds(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match find_missing_kinds(client).await {
            Ok(missing) if missing.is_empty() => {
                info!("CRDs ({}/{}) are available", API_GROUP, API_VERSION);
                return Ok(());
            }
            Ok(missing) => {
                info!(
                    "CRDs {:?} ({}/{}) not yet available, waiting {} seconds...",
                    missing, API_GROUP, API_VERSION, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for CRDs: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

async fn find_missing_kinds(client: &Client) -> Result<Vec<&'static str>> {
    let discovery = Discovery::new(client.clone())
        .filter(&[API_GROUP])
        .run()
        .await?;

    let served: Vec<(String, String)> = discovery
        .groups()
        .filter(|group| group.name() == API_GROUP)
        .flat_map(|group| group.recommended_resources())
        .map(|(ar, _)| (ar.kind, ar.version))
        .collect();

    Ok(missing_kinds(&served))
}

fn missing_kinds(served: &[(String, String)]) -> Vec<&'static str> {
    KINDS
        .iter()
        .copied()
        .filter(|kind| {
            !served
                .iter()
                .any(|(k, version)| k == kind && version == API_VERSION)
        })
        .collect()
}
