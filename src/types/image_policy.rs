// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::types::condition::Condition;

/// Selects the latest tag of an `ImageRepository` according to an ordering policy.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(
    group = "image.reflector.io",
    version = "v1beta1",
    kind = "ImagePolicy",
    namespaced,
    status = "ImagePolicyStatus",
    shortname = "imgpol",
    printcolumn = r#"{"name":"LatestImage","type":"string","jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImagePolicySpec {
    pub image_repository_ref: RepositoryReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_tags: Option<TagFilterSpec>,
    pub policy: PolicyChoice,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub struct RepositoryReference {
    pub name: String,
    /// Defaults to the namespace of the policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct TagFilterSpec {
    /// Regular expression tags must match to be considered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Capture template (`$1`, `$version`) producing the ordering key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum PolicyChoice {
    #[serde(rename = "semver")]
    SemVer(SemVerPolicy),
    #[serde(rename = "numerical")]
    Numerical(OrderedPolicy),
    #[serde(rename = "alphabetical")]
    Alphabetical(OrderedPolicy),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SemVerPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    /// Let pre-release versions compete with releases
    #[serde(default)]
    pub include_prerelease: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct OrderedPolicy {
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Pick the greatest key
    #[default]
    Asc,
    /// Pick the smallest key
    Desc,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImagePolicyStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_previous_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ImagePolicy {
    /// Namespace of the referenced repository, defaulting to the policy's own
    pub fn repository_namespace(&self) -> String {
        self.spec
            .image_repository_ref
            .namespace
            .clone()
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }

    /// Whether this policy points at the given repository
    pub fn refers_to(&self, name: &str, namespace: &str) -> bool {
        self.spec.image_repository_ref.name == name && self.repository_namespace() == namespace
    }

    pub fn latest_image(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.latest_image.as_deref())
    }
}
