// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Tag filtering and ordering-key extraction

use regex::Regex;

use crate::policy::PolicyError;

/// A tag that passed the filter, with the key it is ranked by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub tag: &'a str,
    pub key: String,
}

/// Regex filter with an optional capture template producing the ordering key
#[derive(Debug, Clone)]
pub struct TagFilter {
    pattern: Regex,
    extract: Option<String>,
}

impl TagFilter {
    pub fn new(pattern: &str, extract: Option<&str>) -> Result<Self, PolicyError> {
        let pattern = Regex::new(pattern).map_err(|source| PolicyError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern,
            extract: extract.filter(|e| !e.is_empty()).map(String::from),
        })
    }

    /// Build a filter from optional spec fields; `extract` requires `pattern`.
    pub fn from_spec(
        pattern: Option<&str>,
        extract: Option<&str>,
    ) -> Result<Option<Self>, PolicyError> {
        match (pattern.filter(|p| !p.is_empty()), extract.filter(|e| !e.is_empty())) {
            (Some(pattern), extract) => Self::new(pattern, extract).map(Some),
            (None, Some(_)) => Err(PolicyError::ExtractWithoutPattern),
            (None, None) => Ok(None),
        }
    }

    /// Ordering key for `tag`, or `None` if the tag is filtered out
    pub fn key_for(&self, tag: &str) -> Option<String> {
        let captures = self.pattern.captures(tag)?;
        match &self.extract {
            Some(template) => {
                let mut key = String::new();
                captures.expand(template, &mut key);
                Some(key)
            }
            None => Some(tag.to_string()),
        }
    }
}

/// Apply an optional filter; without one every tag is a candidate keyed by itself
pub fn candidates<'a>(tags: &'a [String], filter: Option<&TagFilter>) -> Vec<Candidate<'a>> {
    tags.iter()
        .filter_map(|tag| {
            let key = match filter {
                Some(filter) => filter.key_for(tag)?,
                None => tag.clone(),
            };
            Some(Candidate {
                tag: tag.as_str(),
                key,
            })
        })
        .collect()
}
