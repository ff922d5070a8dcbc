//! Filter configuration.
//!
//! Loaded from a TOML file, then overridden by `CLAIMGATE_*` environment
//! variables. Validated once at startup; a bad value fails fast.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{ClaimPolicy, KeyPrefix};
use crate::error::{ClaimError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Namespace prefix of every key this filter writes.
    pub key_prefix: String,

    /// Minimum age before an in-progress claim may be taken over.
    pub retry_timeout_secs: u64,

    /// Claim attempts allowed before a file is rejected.
    pub max_tries: u32,

    /// Cap on files accepted by one batch poll. `None` means unbounded.
    pub max_accepted_per_cycle: Option<usize>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            key_prefix: KeyPrefix::default().as_str().to_string(),
            retry_timeout_secs: 60,
            max_tries: 3,
            max_accepted_per_cycle: None,
        }
    }
}

impl FilterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ClaimError::InvalidConfig(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClaimError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `CLAIMGATE_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup (the environment, a map in tests).
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("CLAIMGATE_KEY_PREFIX") {
            self.key_prefix = v;
        }
        if let Some(v) = lookup("CLAIMGATE_RETRY_TIMEOUT_SECS") {
            self.retry_timeout_secs = parse_var("CLAIMGATE_RETRY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("CLAIMGATE_MAX_TRIES") {
            self.max_tries = parse_var("CLAIMGATE_MAX_TRIES", &v)?;
        }
        if let Some(v) = lookup("CLAIMGATE_MAX_ACCEPTED_PER_CYCLE") {
            self.max_accepted_per_cycle = if v.trim().is_empty() {
                None
            } else {
                Some(parse_var("CLAIMGATE_MAX_ACCEPTED_PER_CYCLE", &v)?)
            };
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        if self.max_accepted_per_cycle == Some(0) {
            return Err(ClaimError::InvalidConfig(
                "max_accepted_per_cycle must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> Result<ClaimPolicy> {
        ClaimPolicy::new(self.retry_timeout_secs, self.max_tries)
    }

    pub fn key_prefix(&self) -> KeyPrefix {
        KeyPrefix::new(self.key_prefix.clone())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ClaimError::InvalidConfig(format!("{name}={value:?}: {e}")))
}
