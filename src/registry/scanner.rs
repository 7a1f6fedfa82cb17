// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Tag listing against OCI distribution registries

use async_trait::async_trait;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::constants::registry::TAG_PAGE_SIZE;
use crate::registry::credentials::Credentials;
use crate::registry::reference::{ImageName, ReferenceError};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    InvalidReference(#[from] ReferenceError),

    #[error("authentication to registry failed: {0}")]
    Unauthorized(String),

    #[error("scan did not finish within {0:?}")]
    Timeout(Duration),

    #[error("failed to list tags: {0}")]
    Registry(String),
}

impl ScanError {
    /// Validation failures are not retried until the resource changes
    pub fn is_transient(&self) -> bool {
        !matches!(self, ScanError::InvalidReference(_))
    }
}

/// Result of a successful scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub canonical_name: String,
    pub tags: Vec<String>,
}

/// Lists every tag of a repository. Implementations do not retry.
#[async_trait]
pub trait RegistryScanner: Send + Sync {
    async fn list_tags(
        &self,
        image: &ImageName,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<String>, ScanError>;
}

/// Canonicalize a reference and list its tags within the given deadline.
///
/// Malformed references fail before any network call.
pub async fn scan(
    scanner: &dyn RegistryScanner,
    image_ref: &str,
    credentials: Option<&Credentials>,
    timeout: Duration,
) -> Result<ScanOutcome, ScanError> {
    let image = ImageName::parse(image_ref)?;
    scan_image(scanner, &image, credentials, timeout).await
}

/// Same as [`scan`] for an already canonicalized name
#[instrument(skip(scanner, image, credentials), fields(image = %image))]
pub async fn scan_image(
    scanner: &dyn RegistryScanner,
    image: &ImageName,
    credentials: Option<&Credentials>,
    timeout: Duration,
) -> Result<ScanOutcome, ScanError> {
    let tags = tokio::time::timeout(timeout, scanner.list_tags(image, credentials))
        .await
        .map_err(|_| ScanError::Timeout(timeout))??;

    debug!("Listed {} tags", tags.len());
    Ok(ScanOutcome {
        canonical_name: image.canonical(),
        tags,
    })
}

/// Scanner backed by the `oci-distribution` client
#[derive(Debug, Clone, Default)]
pub struct OciScanner {
    insecure_registries: Vec<String>,
}

impl OciScanner {
    pub fn new(insecure_registries: Vec<String>) -> Self {
        Self {
            insecure_registries,
        }
    }

    fn is_insecure(&self, registry: &str) -> bool {
        let host = registry
            .rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(host, _)| host)
            .unwrap_or(registry);
        matches!(host, "localhost" | "127.0.0.1" | "[::1]")
            || self.insecure_registries.iter().any(|r| r == registry)
    }

    fn client_config(&self, registry: &str) -> ClientConfig {
        let protocol = if self.is_insecure(registry) {
            ClientProtocol::HttpsExcept(vec![registry.to_string()])
        } else {
            ClientProtocol::Https
        };
        ClientConfig {
            protocol,
            ..Default::default()
        }
    }
}

#[async_trait]
impl RegistryScanner for OciScanner {
    async fn list_tags(
        &self,
        image: &ImageName,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<String>, ScanError> {
        let reference = Reference::with_tag(
            image.registry().to_string(),
            image.repository().to_string(),
            "latest".to_string(),
        );
        let auth = match credentials {
            Some(c) => RegistryAuth::Basic(c.username.clone(), c.password.clone()),
            None => RegistryAuth::Anonymous,
        };
        let client = Client::new(self.client_config(image.registry()));

        let mut tags: Vec<String> = Vec::new();
        let mut last: Option<String> = None;
        loop {
            let page = client
                .list_tags(&reference, &auth, Some(TAG_PAGE_SIZE), last.as_deref())
                .await
                .map_err(classify)?;

            let page_last = page.tags.last().cloned();
            if page_last.is_none() || page_last == last {
                break;
            }
            tags.extend(page.tags);
            last = page_last;
        }

        Ok(tags)
    }
}

fn classify(err: OciDistributionError) -> ScanError {
    match err {
        OciDistributionError::AuthenticationFailure(msg) => ScanError::Unauthorized(msg),
        OciDistributionError::UnauthorizedError { url } => {
            ScanError::Unauthorized(format!("unauthorized: {}", url))
        }
        other => ScanError::Registry(other.to_string()),
    }
}
