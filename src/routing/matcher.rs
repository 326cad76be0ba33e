//! Route matching logic.
//!
//! # Responsibilities
//! - Parse route paths into exact or prefix patterns
//! - Match request paths against a pattern (case-sensitive)
//!
//! # Design Decisions
//! - `/api/*` matches `/api` and everything below it, but not `/apix`
//! - Path matching is case-sensitive
//! - No regex to keep matching O(len)

/// A compiled route path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches exactly this path.
    Exact(String),
    /// Matches this literal and any path below it.
    Prefix(String),
}

impl PathPattern {
    pub fn parse(path: &str) -> Self {
        match path.strip_suffix("/*") {
            Some(literal) => PathPattern::Prefix(literal.to_string()),
            None => PathPattern::Exact(path.to_string()),
        }
    }

    /// The literal part of the pattern (without the trailing `/*`).
    pub fn literal(&self) -> &str {
        match self {
            PathPattern::Exact(p) | PathPattern::Prefix(p) => p,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => p == path,
            PathPattern::Prefix(literal) => match path.strip_prefix(literal.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/') || literal.is_empty(),
                None => false,
            },
        }
    }
}
