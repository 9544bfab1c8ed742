//! Engine configuration loaded from `STOCKFLOW_*` environment variables.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::sequence::MAX_NODE_ID;
use stockflow_observability::{LogConfig, LogConfigError};
use stockflow_warehouse::ShippingCostModel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

impl From<LogConfigError> for ConfigError {
    fn from(value: LogConfigError) -> Self {
        match value {
            LogConfigError::Invalid { key, value } => ConfigError::Invalid { key, value },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Postgres URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Node id of the transfer-number generator, unique per running engine.
    pub node_id: u16,
    pub transfer_prefix: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub shipping: ShippingCostModel,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            node_id: 1,
            transfer_prefix: "TR".to_string(),
            default_page_size: 20,
            max_page_size: 100,
            shipping: ShippingCostModel::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `STOCKFLOW_DATABASE_URL`: Postgres URL (default: unset, in-memory)
    /// - `STOCKFLOW_NODE_ID`: generator node id, 0..=1023 (default: 1)
    /// - `STOCKFLOW_TRANSFER_PREFIX`: transfer number prefix (default: TR)
    /// - `STOCKFLOW_DEFAULT_PAGE_SIZE` / `STOCKFLOW_MAX_PAGE_SIZE` (default: 20 / 100)
    /// - `STOCKFLOW_SHIP_BASE_COST`, `STOCKFLOW_SHIP_COST_PER_KM`,
    ///   `STOCKFLOW_SHIP_COST_PER_UNIT` (default: 5.0, 0.01, 0.5)
    /// - `STOCKFLOW_LOG_LEVEL`, `STOCKFLOW_LOG_JSON` (default: info, true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("STOCKFLOW_DATABASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let node_id: u16 = parse_or(&lookup, "STOCKFLOW_NODE_ID", defaults.node_id)?;
        if node_id > MAX_NODE_ID {
            return Err(invalid("STOCKFLOW_NODE_ID", node_id));
        }

        let transfer_prefix = match lookup("STOCKFLOW_TRANSFER_PREFIX") {
            Some(p) => {
                let p = p.trim().to_string();
                if p.is_empty() || p.len() > 16 || !p.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(invalid("STOCKFLOW_TRANSFER_PREFIX", p));
                }
                p
            }
            None => defaults.transfer_prefix,
        };

        let default_page_size = parse_or(&lookup, "STOCKFLOW_DEFAULT_PAGE_SIZE", defaults.default_page_size)?;
        let max_page_size = parse_or(&lookup, "STOCKFLOW_MAX_PAGE_SIZE", defaults.max_page_size)?;
        if max_page_size == 0 {
            return Err(invalid("STOCKFLOW_MAX_PAGE_SIZE", max_page_size));
        }
        if default_page_size == 0 || default_page_size > max_page_size {
            return Err(invalid("STOCKFLOW_DEFAULT_PAGE_SIZE", default_page_size));
        }

        let shipping = ShippingCostModel {
            base: non_negative(&lookup, "STOCKFLOW_SHIP_BASE_COST", defaults.shipping.base)?,
            per_km: non_negative(&lookup, "STOCKFLOW_SHIP_COST_PER_KM", defaults.shipping.per_km)?,
            per_unit: non_negative(&lookup, "STOCKFLOW_SHIP_COST_PER_UNIT", defaults.shipping.per_unit)?,
        };

        Ok(Self {
            database_url,
            node_id,
            transfer_prefix,
            default_page_size,
            max_page_size,
            shipping,
            log: LogConfig::from_lookup(&lookup)?,
        })
    }
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, raw)),
        None => Ok(default),
    }
}

fn non_negative<F>(lookup: &F, key: &'static str, default: f64) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: f64 = parse_or(lookup, key, default)?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(key, value));
    }
    Ok(value)
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
    fn empty_environment_yields_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn reads_every_key() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("STOCKFLOW_DATABASE_URL", "postgres://localhost/stockflow"),
            ("STOCKFLOW_NODE_ID", "7"),
            ("STOCKFLOW_TRANSFER_PREFIX", "TX"),
            ("STOCKFLOW_DEFAULT_PAGE_SIZE", "50"),
            ("STOCKFLOW_MAX_PAGE_SIZE", "200"),
            ("STOCKFLOW_SHIP_BASE_COST", "2.5"),
            ("STOCKFLOW_SHIP_COST_PER_KM", "0"),
            ("STOCKFLOW_SHIP_COST_PER_UNIT", "1"),
            ("STOCKFLOW_LOG_LEVEL", "debug"),
            ("STOCKFLOW_LOG_JSON", "false"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/stockflow"));
        assert_eq!(config.node_id, 7);
        assert_eq!(config.transfer_prefix, "TX");
        assert_eq!((config.default_page_size, config.max_page_size), (50, 200));
        assert_eq!(config.shipping.base, 2.5);
        assert_eq!(config.shipping.per_km, 0.0);
        assert_eq!(config.log.level, "debug");
        assert!(!config.log.json);
    }

    #[test]
    fn invalid_values_name_the_key() {
        let cases = [
            ("STOCKFLOW_NODE_ID", "1024"),
            ("STOCKFLOW_NODE_ID", "abc"),
            ("STOCKFLOW_TRANSFER_PREFIX", "T-R"),
            ("STOCKFLOW_DEFAULT_PAGE_SIZE", "0"),
            ("STOCKFLOW_SHIP_COST_PER_KM", "-1"),
            ("STOCKFLOW_LOG_JSON", "sometimes"),
        ];
        for (key, value) in cases {
            let err = EngineConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            let ConfigError::Invalid { key: got, .. } = err;
            assert_eq!(got, key);
        }
    }

    #[test]
    fn default_page_size_cannot_exceed_max() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("STOCKFLOW_DEFAULT_PAGE_SIZE", "80"),
            ("STOCKFLOW_MAX_PAGE_SIZE", "40"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STOCKFLOW_DEFAULT_PAGE_SIZE", .. }));
    }
}
