// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Ordering strategies used to rank candidate tags

use semver::Version;
use std::cmp::Ordering;

use crate::policy::range::SemVerRange;
use crate::policy::PolicyError;
use crate::types::image_policy::{PolicyChoice, SortOrder};

/// A parsed ordering key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankKey {
    Version(Version),
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderingStrategy {
    SemVer {
        range: Option<SemVerRange>,
        include_prerelease: bool,
    },
    Numerical {
        order: SortOrder,
    },
    Alphabetical {
        order: SortOrder,
    },
}

impl OrderingStrategy {
    pub fn from_choice(choice: &PolicyChoice) -> Result<Self, PolicyError> {
        Ok(match choice {
            PolicyChoice::SemVer(semver) => OrderingStrategy::SemVer {
                range: semver
                    .range
                    .as_deref()
                    .filter(|r| !r.trim().is_empty())
                    .map(SemVerRange::parse)
                    .transpose()?,
                include_prerelease: semver.include_prerelease,
            },
            PolicyChoice::Numerical(p) => OrderingStrategy::Numerical { order: p.order },
            PolicyChoice::Alphabetical(p) => OrderingStrategy::Alphabetical { order: p.order },
        })
    }

    /// Parse an ordering key; `None` drops the candidate
    pub fn rank(&self, key: &str) -> Option<RankKey> {
        match self {
            OrderingStrategy::SemVer {
                range,
                include_prerelease,
            } => {
                let version = parse_version(key)?;
                let admitted = match range {
                    Some(range) => range.matches(&version, *include_prerelease),
                    None => *include_prerelease || version.pre.is_empty(),
                };
                admitted.then_some(RankKey::Version(version))
            }
            OrderingStrategy::Numerical { .. } => key.parse::<i64>().ok().map(RankKey::Number),
            OrderingStrategy::Alphabetical { .. } => Some(RankKey::Text(key.to_string())),
        }
    }

    /// `Greater` means `a` is preferred over `b`
    pub fn compare(&self, a: &RankKey, b: &RankKey) -> Ordering {
        let natural = match (a, b) {
            (RankKey::Version(a), RankKey::Version(b)) => a.cmp_precedence(b),
            (RankKey::Number(a), RankKey::Number(b)) => a.cmp(b),
            (RankKey::Text(a), RankKey::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        };
        match self {
            OrderingStrategy::Numerical {
                order: SortOrder::Desc,
            }
            | OrderingStrategy::Alphabetical {
                order: SortOrder::Desc,
            } => natural.reverse(),
            _ => natural,
        }
    }
}

/// Strict `MAJOR.MINOR.PATCH[-pre][+build]` with an optional leading `v`
fn parse_version(key: &str) -> Option<Version> {
    let trimmed = key
        .strip_prefix('v')
        .or_else(|| key.strip_prefix('V'))
        .unwrap_or(key);
    Version::parse(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::image_policy::{OrderedPolicy, SemVerPolicy};

    #[test]
    fn test_semver_rank_accepts_v_prefix() {
        let strategy = OrderingStrategy::SemVer {
            range: None,
            include_prerelease: false,
        };

        assert!(strategy.rank("v1.2.3").is_some());
        assert!(strategy.rank("1.2.3").is_some());
        assert!(strategy.rank("1.2").is_none());
        assert!(strategy.rank("latest").is_none());
        assert!(strategy.rank("1.2.3-rc.1").is_none());
    }

    #[test]
    fn test_semver_precedence_ignores_build_metadata() {
        let strategy = OrderingStrategy::SemVer {
            range: None,
            include_prerelease: true,
        };
        let a = strategy.rank("1.0.0+build.1").unwrap();
        let b = strategy.rank("1.0.0+build.2").unwrap();
        let pre = strategy.rank("1.0.0-rc.1").unwrap();

        assert_eq!(strategy.compare(&a, &b), Ordering::Equal);
        assert_eq!(strategy.compare(&a, &pre), Ordering::Greater);
    }

    #[test]
    fn test_numerical_rank_and_order() {
        let asc = OrderingStrategy::Numerical {
            order: SortOrder::Asc,
        };
        let desc = OrderingStrategy::Numerical {
            order: SortOrder::Desc,
        };
        let ten = asc.rank("10").unwrap();
        let nine = asc.rank("9").unwrap();

        assert!(asc.rank("1.0.0").is_none());
        assert!(asc.rank("abc").is_none());
        assert_eq!(asc.compare(&ten, &nine), Ordering::Greater);
        assert_eq!(desc.compare(&ten, &nine), Ordering::Less);
    }

    #[test]
    fn test_alphabetical_accepts_everything() {
        let strategy = OrderingStrategy::Alphabetical {
            order: SortOrder::Asc,
        };
        assert!(strategy.rank("").is_some());
        assert!(strategy.rank("anything-at-all").is_some());
    }

    #[test]
    fn test_from_choice() {
        let semver = OrderingStrategy::from_choice(&PolicyChoice::SemVer(SemVerPolicy {
            range: Some("^1".to_string()),
            include_prerelease: false,
        }))
        .unwrap();
        assert!(matches!(semver, OrderingStrategy::SemVer { range: Some(_), .. }));

        let blank_range = OrderingStrategy::from_choice(&PolicyChoice::SemVer(SemVerPolicy {
            range: Some("  ".to_string()),
            include_prerelease: false,
        }))
        .unwrap();
        assert!(matches!(blank_range, OrderingStrategy::SemVer { range: None, .. }));

        let alphabetical =
            OrderingStrategy::from_choice(&PolicyChoice::Alphabetical(OrderedPolicy::default()))
                .unwrap();
        assert_eq!(
            alphabetical,
            OrderingStrategy::Alphabetical {
                order: SortOrder::Asc
            }
        );
    }

    #[test]
    fn test_from_choice_invalid_range() {
        let result = OrderingStrategy::from_choice(&PolicyChoice::SemVer(SemVerPolicy {
            range: Some("not a range".to_string()),
            include_prerelease: false,
        }));
        assert!(matches!(result, Err(PolicyError::InvalidRange { .. })));
    }
}
