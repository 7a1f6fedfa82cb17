// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Image reference canonicalization

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

use crate::constants::registry::{DEFAULT_NAMESPACE, DEFAULT_REGISTRY, DOCKER_HUB_ALIAS};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error(".spec.image value should not start with URL scheme; remove '{0}://'")]
    UrlScheme(String),

    #[error("image reference is empty")]
    Empty,

    #[error("invalid repository '{repository}' in image reference '{reference}'")]
    InvalidRepository { reference: String, repository: String },

    #[error("invalid tag '{tag}' in image reference '{reference}'")]
    InvalidTag { reference: String, tag: String },
}

fn path_component() -> &'static Regex {
    static COMPONENT: OnceLock<Regex> = OnceLock::new();
    COMPONENT.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("static regex")
    })
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("static regex"))
}

/// A repository reference normalized to registry host plus repository path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageName {
    registry: String,
    repository: String,
}

impl ImageName {
    /// Parse and canonicalize an image reference. Tags and digests are discarded.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        if let Some((scheme, _)) = reference.split_once("://") {
            return Err(ReferenceError::UrlScheme(scheme.to_string()));
        }
        if reference.trim().is_empty() {
            return Err(ReferenceError::Empty);
        }

        let without_digest = reference.split('@').next().unwrap_or(reference);
        let name = strip_tag(reference, without_digest)?;

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => (first.to_string(), rest.to_string()),
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };
        let registry = normalize_registry(&registry);

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("{}/{}", DEFAULT_NAMESPACE, repository)
        } else {
            repository
        };

        if repository.split('/').any(|c| !path_component().is_match(c)) {
            return Err(ReferenceError::InvalidRepository {
                reference: reference.to_string(),
                repository,
            });
        }

        Ok(ImageName {
            registry,
            repository,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Fully-qualified name used as tag store key
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Full image reference for a tag of this repository
    pub fn with_tag(&self, tag: &str) -> String {
        format!("{}:{}", self.canonical(), tag)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

/// Canonical name of an image reference, e.g. `alpine` -> `index.docker.io/library/alpine`
pub fn canonicalize(reference: &str) -> Result<String, ReferenceError> {
    ImageName::parse(reference).map(|name| name.canonical())
}

/// Map the Docker Hub aliases onto the default registry host
pub fn normalize_registry(host: &str) -> String {
    match host {
        DOCKER_HUB_ALIAS | "registry-1.docker.io" => DEFAULT_REGISTRY.to_string(),
        other => other.to_string(),
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

// A tag is whatever follows the last ':' that sits after the last '/'; an earlier ':' is a port.
fn strip_tag<'a>(reference: &str, name: &'a str) -> Result<&'a str, ReferenceError> {
    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[last_slash..].rfind(':') {
        Some(idx) => {
            let split = last_slash + idx;
            let tag = &name[split + 1..];
            if !tag_pattern().is_match(tag) {
                return Err(ReferenceError::InvalidTag {
                    reference: reference.to_string(),
                    tag: tag.to_string(),
                });
            }
            Ok(&name[..split])
        }
        None => Ok(name),
    }
}
