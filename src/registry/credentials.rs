// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry credentials extracted from docker-config secrets

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::registry::reference::normalize_registry;

const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const DOCKER_CFG_KEY: &str = ".dockercfg";

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("failed to get secret '{name}': {source}")]
    Fetch {
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("secret '{0}' has no .dockerconfigjson or .dockercfg data")]
    MissingKey(String),

    #[error("secret '{name}' does not hold valid docker config JSON: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("secret '{name}' has no credentials for registry '{registry}'")]
    NoEntry { name: String, registry: String },
}

/// Username/password pair for basic registry authentication
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Deserialize)]
struct AuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Find the credentials for a registry host in a docker config document.
///
/// Both the `{"auths": {...}}` layout and the legacy flat `.dockercfg` layout are accepted.
pub fn credentials_for_registry(
    secret_name: &str,
    document: &[u8],
    registry: &str,
) -> Result<Credentials, CredentialsError> {
    let malformed = |source| CredentialsError::Malformed {
        name: secret_name.to_string(),
        source,
    };

    let value: serde_json::Value = serde_json::from_slice(document).map_err(malformed)?;
    let auths = if value.get("auths").is_some() {
        serde_json::from_value::<DockerConfig>(value).map_err(malformed)?.auths
    } else {
        serde_json::from_value::<HashMap<String, AuthEntry>>(value).map_err(malformed)?
    };

    let wanted = normalize_registry(registry);
    auths
        .into_iter()
        .find(|(key, _)| registry_host(key) == wanted)
        .and_then(|(_, entry)| match (entry.username, entry.password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        })
        .ok_or_else(|| CredentialsError::NoEntry {
            name: secret_name.to_string(),
            registry: registry.to_string(),
        })
}

/// Read a docker-config secret and return the credentials for a registry host
#[instrument(skip(client))]
pub async fn credentials_from_secret(
    client: &Client,
    namespace: &str,
    secret_name: &str,
    registry: &str,
) -> Result<Credentials, CredentialsError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets
        .get(secret_name)
        .await
        .map_err(|source| CredentialsError::Fetch {
            name: secret_name.to_string(),
            source,
        })?;

    let document = secret
        .data
        .as_ref()
        .and_then(|data| data.get(DOCKER_CONFIG_JSON_KEY).or_else(|| data.get(DOCKER_CFG_KEY)))
        .map(|bytes| bytes.0.clone())
        .ok_or_else(|| CredentialsError::MissingKey(secret_name.to_string()))?;

    debug!("Found docker config in secret {}/{}", namespace, secret_name);
    credentials_for_registry(secret_name, &document, registry)
}

// Keys may be bare hosts or full URLs like https://index.docker.io/v1/
fn registry_host(key: &str) -> String {
    let host = if key.contains("://") {
        url::Url::parse(key)
            .ok()
            .and_then(|u| {
                u.host_str().map(|h| match u.port() {
                    Some(port) => format!("{}:{}", h, port),
                    None => h.to_string(),
                })
            })
            .unwrap_or_else(|| key.to_string())
    } else {
        key.split('/').next().unwrap_or(key).to_string()
    };
    normalize_registry(&host)
}
