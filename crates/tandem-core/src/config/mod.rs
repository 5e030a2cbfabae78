//! Engine configuration.
//!
//! Values come from `TANDEM_*` environment variables. Parsing goes through a
//! lookup function so tests can supply their own variables.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MAX_COMMIT_RETRIES: u32 = 3;
const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tie-break used when a stale operation overlaps a committed one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Reject the incoming operation only when its client timestamp is
    /// earlier than the committed operation's
    #[default]
    ClientTimestamp,
    /// Reject every overlapping stale operation; commit order always wins
    CommitOrder,
}

impl ConflictPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientTimestamp => "client-timestamp",
            Self::CommitOrder => "commit-order",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client-timestamp" | "timestamp" => Ok(Self::ClientTimestamp),
            "commit-order" | "commit" => Ok(Self::CommitOrder),
            other => Err(ConfigError::Invalid(format!(
                "TANDEM_CONFLICT_POLICY must be client-timestamp or commit-order, got {other}"
            ))),
        }
    }
}

/// Runtime settings for the sync manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub conflict_policy: ConflictPolicy,
    /// Attempts to redo an apply after losing a conditional write
    pub max_commit_retries: u32,
    /// Default page size for operation history
    pub history_limit: usize,
    /// Database file used by the CLI
    pub db_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            db_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let conflict_policy = optional_trimmed(&lookup, "TANDEM_CONFLICT_POLICY")
            .map(|value| value.parse::<ConflictPolicy>())
            .transpose()?
            .unwrap_or_default();

        let max_commit_retries = value_or_default(
            &lookup,
            "TANDEM_MAX_COMMIT_RETRIES",
            &DEFAULT_MAX_COMMIT_RETRIES.to_string(),
        )
        .parse::<u32>()
        .map_err(|_| {
            ConfigError::Invalid("TANDEM_MAX_COMMIT_RETRIES must be an integer in [0, 16]".to_string())
        })?;
        if max_commit_retries > 16 {
            return Err(ConfigError::Invalid(
                "TANDEM_MAX_COMMIT_RETRIES must be in [0, 16]".to_string(),
            ));
        }

        let history_limit = value_or_default(
            &lookup,
            "TANDEM_HISTORY_LIMIT",
            &DEFAULT_HISTORY_LIMIT.to_string(),
        )
        .parse::<usize>()
        .map_err(|_| {
            ConfigError::Invalid("TANDEM_HISTORY_LIMIT must be an integer in [1, 1000]".to_string())
        })?;
        if !(1..=1_000).contains(&history_limit) {
            return Err(ConfigError::Invalid(
                "TANDEM_HISTORY_LIMIT must be in [1, 1000]".to_string(),
            ));
        }

        let db_path = optional_trimmed(&lookup, "TANDEM_DB_PATH").map(PathBuf::from);

        Ok(Self {
            conflict_policy,
            max_commit_retries,
            history_limit,
            db_path,
        })
    }

    #[must_use]
    pub const fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries;
        self
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        EngineConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.conflict_policy, ConflictPolicy::ClientTimestamp);
        assert_eq!(config.max_commit_retries, 3);
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn config_reads_all_values() {
        let config = config_from(&[
            ("TANDEM_CONFLICT_POLICY", " commit-order "),
            ("TANDEM_MAX_COMMIT_RETRIES", "5"),
            ("TANDEM_HISTORY_LIMIT", "200"),
            ("TANDEM_DB_PATH", "/tmp/tandem.db"),
        ])
        .unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::CommitOrder);
        assert_eq!(config.max_commit_retries, 5);
        assert_eq!(config.history_limit, 200);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/tandem.db")));
    }

    #[test]
    fn config_rejects_unknown_policy() {
        let err = config_from(&[("TANDEM_CONFLICT_POLICY", "random")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("TANDEM_CONFLICT_POLICY"));
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        assert!(config_from(&[("TANDEM_MAX_COMMIT_RETRIES", "17")]).is_err());
        assert!(config_from(&[("TANDEM_MAX_COMMIT_RETRIES", "-1")]).is_err());
        assert!(config_from(&[("TANDEM_HISTORY_LIMIT", "0")]).is_err());
        assert!(config_from(&[("TANDEM_HISTORY_LIMIT", "lots")]).is_err());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("TANDEM_HISTORY_LIMIT", "   "), ("TANDEM_DB_PATH", "")]).unwrap();
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.db_path, None);
    }
}
