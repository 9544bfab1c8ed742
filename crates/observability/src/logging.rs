//! Tracing/logging initialization.
//!
//! JSON or human-readable output, timestamps, and a level filter that
//! `RUST_LOG` overrides.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_VAR: &str = "STOCKFLOW_LOG_LEVEL";
pub const LOG_JSON_VAR: &str = "STOCKFLOW_LOG_JSON";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `stockflow_infra=debug,info`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Result<Self, LogConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, config map, test fixture).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LogConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = lookup(LOG_LEVEL_VAR) {
            let level = level.trim().to_string();
            if level.is_empty() || EnvFilter::try_new(&level).is_err() {
                return Err(LogConfigError::Invalid {
                    key: LOG_LEVEL_VAR,
                    value: level,
                });
            }
            config.level = level;
        }
        if let Some(json) = lookup(LOG_JSON_VAR) {
            config.json = parse_bool(&json).ok_or(LogConfigError::Invalid {
                key: LOG_JSON_VAR,
                value: json,
            })?;
        }
        Ok(config)
    }
}

/// `true`/`false`, `1`/`0`, `yes`/`no`, case-insensitive.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_with(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(LogConfig::from_lookup(lookup(&[])).unwrap(), LogConfig::default());
    }

    #[test]
    fn reads_level_and_format() {
        let config = LogConfig::from_lookup(lookup(&[
            (LOG_LEVEL_VAR, "stockflow_infra=debug,warn"),
            (LOG_JSON_VAR, "no"),
        ]))
        .unwrap();
        assert_eq!(config.level, "stockflow_infra=debug,warn");
        assert!(!config.json);
    }

    #[test]
    fn rejects_malformed_values() {
        let err = LogConfig::from_lookup(lookup(&[(LOG_JSON_VAR, "maybe")])).unwrap_err();
        assert_eq!(
            err,
            LogConfigError::Invalid {
                key: LOG_JSON_VAR,
                value: "maybe".to_string()
            }
        );
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LogConfig {
            json: false,
            ..LogConfig::default()
        };
        init_with(&config);
        init_with(&config);
    }
}
