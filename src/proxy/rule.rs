//! Forward rules: which paths go upstream, and how the answer comes back.

use std::fmt;

use serde::Deserialize;

use crate::proxy::upstream::Upstream;

/// How an upstream response is written back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStrategy {
    /// Read the whole upstream response, then write it in one go.
    Buffered,
    /// Write the head immediately and pipe the body through.
    Streamed,
}

impl fmt::Display for RelayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayStrategy::Buffered => f.write_str("buffered"),
            RelayStrategy::Streamed => f.write_str("streamed"),
        }
    }
}

/// A path test. Matching is case-sensitive and purely textual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    /// `path.starts_with(prefix)`; note `/api` also matches `/apiary`.
    Prefix(String),
    /// `path == exact`.
    Exact(String),
}

impl PathMatch {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatch::Exact(exact) => path == exact,
        }
    }
}

impl fmt::Display for PathMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathMatch::Prefix(p) => write!(f, "{p}*"),
            PathMatch::Exact(p) => f.write_str(p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    pub matcher: PathMatch,
    pub upstream: Upstream,
    pub strategy: RelayStrategy,
}

impl ForwardRule {
    pub fn new(matcher: PathMatch, upstream: Upstream, strategy: RelayStrategy) -> Self {
        Self {
            matcher,
            upstream,
            strategy,
        }
    }
}

/// The stock rule set: everything under `/api` buffered, the `/test`
/// health check streamed.
pub fn default_rules(upstream: &Upstream) -> Vec<ForwardRule> {
    vec![
        ForwardRule::new(
            PathMatch::Prefix("/api".to_string()),
            upstream.clone(),
            RelayStrategy::Buffered,
        ),
        ForwardRule::new(
            PathMatch::Exact("/test".to_string()),
            upstream.clone(),
            RelayStrategy::Streamed,
        ),
    ]
}

/// Returns the first rule matching `path`.
pub fn find_rule<'a>(rules: &'a [ForwardRule], path: &str) -> Option<&'a ForwardRule> {
    rules.iter().find(|rule| rule.matcher.matches(path))
}
