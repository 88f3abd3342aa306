//! Search configuration.
//!
//! [`SearchConfig`] can be deserialised (every field has a default), parsed
//! from the environment with [`SearchConfig::from_env`], flattened into a host
//! binary's clap arguments, or built programmatically.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SEARCH_DEFAULT_COUNT` | 100 | Page size when `_count` is absent |
//! | `SEARCH_MAX_COUNT` | 1000 | Upper bound for `_count` |
//! | `SEARCH_REQUEST_TIMEOUT_MS` | 30000 | Deadline per engine round trip |
//! | `SEARCH_MAX_CHAIN_RESULTS` | 10000 | Rows read per `_has` stage |
//! | `SEARCH_VALIDATE_RESOURCE_TYPES` | true | Reject non-R4 resource types |

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_COUNT;

/// Tunables for [`crate::SearchOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq, Parser, Serialize, Deserialize)]
#[command(name = "helios-search")]
pub struct SearchConfig {
    /// Page size used when `_count` is absent.
    #[arg(long, env = "SEARCH_DEFAULT_COUNT", default_value = "100")]
    #[serde(default = "default_count")]
    pub default_count: u32,

    /// Largest page size honoured; bigger `_count` values are clamped.
    #[arg(long, env = "SEARCH_MAX_COUNT", default_value = "1000")]
    #[serde(default = "default_max_count")]
    pub max_count: u32,

    /// Deadline for each engine round trip, in milliseconds.
    #[arg(long, env = "SEARCH_REQUEST_TIMEOUT_MS", default_value = "30000")]
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum number of rows read by each `_has` resolution stage.
    #[arg(long, env = "SEARCH_MAX_CHAIN_RESULTS", default_value = "10000")]
    #[serde(default = "default_max_chain_results")]
    pub max_chain_results: u32,

    /// Reject resource types that are not part of FHIR R4.
    #[arg(
        long,
        env = "SEARCH_VALIDATE_RESOURCE_TYPES",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    #[serde(default = "default_true")]
    pub validate_resource_types: bool,
}

fn default_count() -> u32 {
    DEFAULT_COUNT
}

fn default_max_count() -> u32 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_max_chain_results() -> u32 {
    10000
}

fn default_true() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_count: default_count(),
            max_count: default_max_count(),
            request_timeout_ms: default_request_timeout_ms(),
            max_chain_results: default_max_chain_results(),
            validate_resource_types: true,
        }
    }
}

impl SearchConfig {
    /// Creates a configuration from environment variables.
    pub fn from_env() -> Self {
        // Ignore the process arguments; they belong to the host binary
        Self::try_parse_from(["helios-search"]).unwrap_or_default()
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_count == 0 {
            errors.push("Max count cannot be 0".to_string());
        }

        if self.default_count > self.max_count {
            errors.push("Default count cannot exceed max count".to_string());
        }

        if self.request_timeout_ms == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if self.max_chain_results == 0 {
            errors.push("Max chain results cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    pub fn for_testing() -> Self {
        Self {
            request_timeout_ms: 2000,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.default_count, 100);
        assert_eq!(config.max_count, 1000);
        assert_eq!(config.request_timeout_ms, 30000);
        assert!(config.validate_resource_types);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: SearchConfig = serde_json::from_str(r#"{"max_count": 50, "default_count": 20}"#).unwrap();
        assert_eq!(config.max_count, 50);
        assert_eq!(config.default_count, 20);
        assert_eq!(config.max_chain_results, 10000);
        assert!(config.validate_resource_types);
    }

    #[test]
    fn test_parse_from_args() {
        let config = SearchConfig::try_parse_from([
            "helios-search",
            "--max-count",
            "250",
            "--validate-resource-types",
            "false",
        ])
        .unwrap();
        assert_eq!(config.max_count, 250);
        assert!(!config.validate_resource_types);
    }

    #[test]
    fn test_validate_valid() {
        assert!(SearchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid() {
        let config = SearchConfig {
            default_count: 500,
            max_count: 100,
            request_timeout_ms: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
