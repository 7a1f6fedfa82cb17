// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::duration::parse_duration;

const DEFAULT_STORAGE_PATH: &str = "/data/tags.redb";
const DEFAULT_SCAN_RETRY_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_DEPENDENCY_REQUEUE_INTERVAL: Duration = Duration::from_secs(10);

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Location of the embedded tag store
    pub storage_path: PathBuf,
    /// Registry hosts that are scanned over plain HTTP
    pub insecure_registries: Vec<String>,
    /// Backoff after a transient scan failure
    pub scan_retry_interval: Duration,
    /// Requeue delay while a policy waits for its repository to be scanned
    pub dependency_requeue_interval: Duration,
    /// Restricts both controllers to a single namespace when set
    pub watch_namespace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            insecure_registries: Vec::new(),
            scan_retry_interval: DEFAULT_SCAN_RETRY_INTERVAL,
            dependency_requeue_interval: DEFAULT_DEPENDENCY_REQUEUE_INTERVAL,
            watch_namespace: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let storage_path = lookup("STORAGE_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path);

        let insecure_registries = lookup("INSECURE_REGISTRIES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let scan_retry_interval = match lookup("SCAN_RETRY_INTERVAL") {
            Some(v) => parse_duration(&v)
                .with_context(|| format!("SCAN_RETRY_INTERVAL is not a valid duration: {}", v))?,
            None => defaults.scan_retry_interval,
        };

        let dependency_requeue_interval = match lookup("DEPENDENCY_REQUEUE_INTERVAL") {
            Some(v) => parse_duration(&v).with_context(|| {
                format!("DEPENDENCY_REQUEUE_INTERVAL is not a valid duration: {}", v)
            })?,
            None => defaults.dependency_requeue_interval,
        };

        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        Ok(Config {
            storage_path,
            insecure_registries,
            scan_retry_interval,
            dependency_requeue_interval,
            watch_namespace,
        })
    }
}
