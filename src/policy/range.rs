// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Semantic version ranges such as `>=1.0.0 <2.0.0`, `^1.2`, `1.x || 2.x`

use semver::{Prerelease, Version, VersionReq};

use crate::policy::PolicyError;

#[derive(Debug, Clone, PartialEq)]
pub struct SemVerRange {
    alternatives: Vec<VersionReq>,
}

impl SemVerRange {
    pub fn parse(range: &str) -> Result<Self, PolicyError> {
        let alternatives = range
            .split("||")
            .map(|alternative| {
                let normalized = normalize(alternative);
                VersionReq::parse(&normalized).map_err(|source| PolicyError::InvalidRange {
                    range: range.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { alternatives })
    }

    /// Whether `version` falls inside any alternative.
    ///
    /// Pre-releases follow the usual rule (only admitted when a comparator names the same
    /// `MAJOR.MINOR.PATCH` with a pre-release) unless `include_prerelease` is set, in which
    /// case a pre-release is also admitted when its release version is in range.
    pub fn matches(&self, version: &Version, include_prerelease: bool) -> bool {
        self.alternatives.iter().any(|req| {
            req.matches(version)
                || (include_prerelease
                    && !version.pre.is_empty()
                    && req.matches(&release_of(version)))
        })
    }
}

fn release_of(version: &Version) -> Version {
    Version {
        pre: Prerelease::EMPTY,
        ..version.clone()
    }
}

// Accept whitespace-separated comparators and operators detached from their version
// (`>= 1.0 < 2`) by rewriting them into the comma-separated form.
fn normalize(alternative: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for token in alternative.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        comparators.push(format!("{}{}", std::mem::take(&mut pending_op), token));
    }

    if comparators.is_empty() {
        return "*".to_string();
    }
    comparators.join(", ")
}
