// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Latest-tag selection: filter, rank by strategy, pick the maximum.

pub mod filter;
pub mod range;
pub mod strategy;

use thiserror::Error;

use crate::types::image_policy::ImagePolicySpec;

pub use filter::{candidates, Candidate, TagFilter};
pub use range::SemVerRange;
pub use strategy::{OrderingStrategy, RankKey};

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("invalid tag filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("filterTags.extract requires filterTags.pattern")]
    ExtractWithoutPattern,

    #[error("invalid semver range '{range}': {source}")]
    InvalidRange {
        range: String,
        #[source]
        source: semver::Error,
    },

    #[error("no tag matches the policy")]
    NoMatch,
}

/// Select the preferred tag.
///
/// Candidates whose keys compare equal are resolved in favour of the
/// lexicographically greatest tag, so the result never depends on input order.
pub fn select(
    tags: &[String],
    filter: Option<&TagFilter>,
    strategy: &OrderingStrategy,
) -> Result<String, PolicyError> {
    candidates(tags, filter)
        .into_iter()
        .filter_map(|c| strategy.rank(&c.key).map(|rank| (rank, c.tag)))
        .max_by(|(rank_a, tag_a), (rank_b, tag_b)| {
            strategy
                .compare(rank_a, rank_b)
                .then_with(|| tag_a.cmp(tag_b))
        })
        .map(|(_, tag)| tag.to_string())
        .ok_or(PolicyError::NoMatch)
}

/// A compiled policy, ready to evaluate tag sets
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    filter: Option<TagFilter>,
    strategy: OrderingStrategy,
}

impl PolicyEngine {
    pub fn new(filter: Option<TagFilter>, strategy: OrderingStrategy) -> Self {
        Self { filter, strategy }
    }

    /// Compile the filter and strategy of a policy spec
    pub fn from_spec(spec: &ImagePolicySpec) -> Result<Self, PolicyError> {
        let filter = match &spec.filter_tags {
            Some(f) => TagFilter::from_spec(f.pattern.as_deref(), f.extract.as_deref())?,
            None => None,
        };
        let strategy = OrderingStrategy::from_choice(&spec.policy)?;
        Ok(Self::new(filter, strategy))
    }

    pub fn select(&self, tags: &[String]) -> Result<String, PolicyError> {
        select(tags, self.filter.as_ref(), &self.strategy)
    }
}
