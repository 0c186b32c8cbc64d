//! Server configuration.
//!
//! Settings come from three places, later ones winning: built-in defaults,
//! an optional YAML file named by `DEVPROXY_CONFIG`, and the `LISTEN`,
//! `UPSTREAM` and `STATIC_DIR` environment variables. Everything is read
//! once at startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::proxy::interceptor::DEFAULT_MAX_BODY;
use crate::proxy::rule::{ForwardRule, PathMatch, RelayStrategy, default_rules};
use crate::proxy::upstream::{Forwarder, Upstream};

/// A forward rule as written in the config file. Exactly one of `prefix`
/// and `exact` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub exact: Option<String>,
    pub strategy: RelayStrategy,
}

impl RuleConfig {
    fn to_rule(&self, upstream: &Upstream) -> Result<ForwardRule> {
        let matcher = match (&self.prefix, &self.exact) {
            (Some(prefix), None) => PathMatch::Prefix(prefix.clone()),
            (None, Some(exact)) => PathMatch::Exact(exact.clone()),
            _ => anyhow::bail!("Rule must set exactly one of `prefix` or `exact`"),
        };
        Ok(ForwardRule::new(matcher, upstream.clone(), self.strategy))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the dev server listens on
    pub listen_addr: String,
    /// Backend every rule forwards to, as an `http://` URL
    pub upstream: String,
    /// Send `Accept-Encoding: identity` upstream
    pub suppress_encoding: bool,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Largest request body forwarded, in bytes
    pub max_body_bytes: usize,
    /// Directory served to requests no rule matches
    pub static_dir: Option<PathBuf>,
    /// Replaces the stock `/api` + `/test` rules when present
    pub rules: Option<Vec<RuleConfig>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:5173".to_string(),
            upstream: "http://localhost:5000".to_string(),
            suppress_encoding: true,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_body_bytes: DEFAULT_MAX_BODY,
            static_dir: None,
            rules: None,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration using `lookup` in place of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = match lookup("DEVPROXY_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {path}"))?;
                Self::from_yaml_str(&raw).with_context(|| format!("Invalid config file {path}"))?
            }
            None => Self::default(),
        };

        if let Some(listen_addr) = lookup("LISTEN") {
            cfg.listen_addr = listen_addr;
        }
        if let Some(upstream) = lookup("UPSTREAM") {
            cfg.upstream = upstream;
        }
        if let Some(static_dir) = lookup("STATIC_DIR") {
            cfg.static_dir = Some(PathBuf::from(static_dir));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(raw).context("Failed to parse YAML")?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        self.upstream()?;
        self.forward_rules()?;
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            anyhow::bail!("Timeouts must be greater than zero");
        }
        Ok(())
    }

    pub fn upstream(&self) -> Result<Upstream> {
        Upstream::parse(&self.upstream)
    }

    /// The rule list, all pointing at the configured upstream.
    pub fn forward_rules(&self) -> Result<Vec<ForwardRule>> {
        let upstream = self.upstream()?;
        match &self.rules {
            Some(rules) => rules.iter().map(|r| r.to_rule(&upstream)).collect(),
            None => Ok(default_rules(&upstream)),
        }
    }

    pub fn forwarder(&self) -> Forwarder {
        Forwarder::new(
            Duration::from_millis(self.connect_timeout_ms),
            Duration::from_millis(self.request_timeout_ms),
        )
        .with_encoding_suppression(self.suppress_encoding)
    }
}
