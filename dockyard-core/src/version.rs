//! Engine API versions.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::DockyardError;

/// An engine API version such as `1.41` or `1.11-ubuntu0`.
///
/// Only the numeric dot-separated prefix takes part in comparisons; a
/// `-suffix` is dropped while parsing. Components compare numerically
/// (`1.9 < 1.11`) and a strict prefix orders first (`1.1 < 1.1.1`).
///
/// ```rust
/// use dockyard_core::ApiVersion;
///
/// let a: ApiVersion = "1.9".parse().unwrap();
/// let b: ApiVersion = "1.11-el7".parse().unwrap();
/// assert!(a.less_than(&b));
/// assert_eq!(b.to_string(), "1.11");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiVersion(Vec<u64>);

impl ApiVersion {
    /// Parse a version string.
    pub fn parse(input: &str) -> Result<Self, DockyardError> {
        let numeric = input.split_once('-').map_or(input, |(head, _)| head);
        if numeric.is_empty() {
            return Err(DockyardError::MalformedVersion(input.to_string()));
        }

        numeric
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| DockyardError::MalformedVersion(input.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// The numeric components.
    #[must_use]
    pub fn components(&self) -> &[u64] {
        &self.0
    }

    /// Three-way comparison every other ordering helper is built on.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.cmp(b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        self.0.len().cmp(&other.0.len())
    }

    #[must_use]
    pub fn less_than(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Less
    }

    #[must_use]
    pub fn less_than_or_equal_to(&self, other: &Self) -> bool {
        self.compare(other) != Ordering::Greater
    }

    #[must_use]
    pub fn greater_than(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Greater
    }

    #[must_use]
    pub fn greater_than_or_equal_to(&self, other: &Self) -> bool {
        self.compare(other) != Ordering::Less
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for ApiVersion {
    type Err = DockyardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}
