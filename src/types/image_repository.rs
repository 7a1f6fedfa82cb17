// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{annotations, scan::DEFAULT_EXCLUSION_LIST};
use crate::types::condition::{is_ready, Condition};
use crate::types::duration::{parse_duration, DurationError};

/// A registry repository whose tags are scanned on an interval and cached in the tag store.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(
    group = "image.reflector.io",
    version = "v1beta1",
    kind = "ImageRepository",
    namespaced,
    status = "ImageRepositoryStatus",
    shortname = "imgrepo",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.canonicalImageName"}"#,
    printcolumn = r#"{"name":"Tags","type":"integer","jsonPath":".status.lastScanResult.tagCount"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageRepositorySpec {
    /// Image reference to scan, e.g. `alpine` or `ghcr.io/org/app`
    pub image: String,
    /// Time between scans, as a duration string like `5m`
    pub interval: String,
    /// Deadline for a single scan; defaults to the interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Secret of type dockerconfigjson holding registry credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
    #[serde(default)]
    pub suspend: bool,
    /// Regular expressions of tags that are never stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusion_list: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRepositoryStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_image_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan_result: Option<ScanResult>,
    /// Last force-rescan token that resulted in a scan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_handled_reconcile_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_exclusion_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Inputs and time of the most recent transient scan failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failed_scan: Option<FailedScan>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedScan {
    pub time: DateTime<Utc>,
    pub canonical_image_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_requested_at: Option<String>,
    #[serde(default)]
    pub exclusion_list: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub tag_count: usize,
    pub scan_time: DateTime<Utc>,
    /// A handful of the lexically highest tags, for display
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub latest_tags: Vec<String>,
}

impl ImageRepository {
    pub fn is_suspended(&self) -> bool {
        self.spec.suspend
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_ready(&s.conditions))
    }

    /// Current value of the force-rescan annotation, if any
    pub fn reconcile_request_token(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::RECONCILE_REQUESTED_AT))
            .map(|s| s.as_str())
    }

    pub fn last_handled_reconcile_at(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.last_handled_reconcile_at.as_deref())
    }

    /// Canonical name recorded by the last successful scan, empty if never scanned
    pub fn canonical_image_name(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.canonical_image_name.as_deref())
            .unwrap_or_default()
    }

    pub fn last_scan_result(&self) -> Option<&ScanResult> {
        self.status.as_ref().and_then(|s| s.last_scan_result.as_ref())
    }

    pub fn last_failed_scan(&self) -> Option<&FailedScan> {
        self.status.as_ref().and_then(|s| s.last_failed_scan.as_ref())
    }

    pub fn interval(&self) -> Result<Duration, DurationError> {
        parse_duration(&self.spec.interval)
    }

    pub fn timeout(&self) -> Result<Duration, DurationError> {
        match &self.spec.timeout {
            Some(timeout) => parse_duration(timeout),
            None => self.interval(),
        }
    }

    /// Exclusion patterns in effect, falling back to the defaults
    pub fn exclusion_list(&self) -> Vec<String> {
        self.spec.exclusion_list.clone().unwrap_or_else(|| {
            DEFAULT_EXCLUSION_LIST
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }
}
