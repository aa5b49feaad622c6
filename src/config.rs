/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/config.rs
*
* Operator configuration, read from environment variables at startup.
*
* Variables:
* - `UX_SYNC_DATASTORE`: `configmap` (default) or `memory`.
* - `UX_SYNC_DATASTORE_NAMESPACE`: namespace holding ConfigMap records (`kubevela`).
* - `UX_SYNC_WATCH_NAMESPACE`: watch a single namespace instead of all of them.
* - `UX_SYNC_LOG_FORMAT`: `json` (default) or `text`.
* - `UX_SYNC_RETRY_INTERVAL_SECS`: how often failed syncs are retried (30).
*
* Empty values count as unset. Unknown values are rejected.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::ConfigError;
use std::time::Duration;

pub const ENV_DATASTORE: &str = "UX_SYNC_DATASTORE";
pub const ENV_DATASTORE_NAMESPACE: &str = "UX_SYNC_DATASTORE_NAMESPACE";
pub const ENV_WATCH_NAMESPACE: &str = "UX_SYNC_WATCH_NAMESPACE";
pub const ENV_LOG_FORMAT: &str = "UX_SYNC_LOG_FORMAT";
pub const ENV_RETRY_INTERVAL: &str = "UX_SYNC_RETRY_INTERVAL_SECS";

const DEFAULT_DATASTORE_NAMESPACE: &str = "kubevela";
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DatastoreDriver {
    #[default]
    ConfigMap,
    Memory,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub datastore: DatastoreDriver,
    pub datastore_namespace: String,
    pub watch_namespace: Option<String>,
    pub log_format: LogFormat,
    pub retry_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            datastore: DatastoreDriver::default(),
            datastore_namespace: DEFAULT_DATASTORE_NAMESPACE.to_string(),
            watch_namespace: None,
            log_format: LogFormat::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = OperatorConfig::default();

        if let Some(value) = get(ENV_DATASTORE) {
            config.datastore = match value.trim().to_ascii_lowercase().as_str() {
                "configmap" | "kubeapi" => DatastoreDriver::ConfigMap,
                "memory" => DatastoreDriver::Memory,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_DATASTORE,
                        value,
                        expected: "configmap, memory",
                    })
                }
            };
        }
        if let Some(value) = get(ENV_DATASTORE_NAMESPACE) {
            config.datastore_namespace = value.trim().to_string();
        }
        config.watch_namespace = get(ENV_WATCH_NAMESPACE).map(|v| v.trim().to_string());
        if let Some(value) = get(ENV_LOG_FORMAT) {
            config.log_format = match value.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_LOG_FORMAT,
                        value,
                        expected: "json, text",
                    })
                }
            };
        }
        if let Some(value) = get(ENV_RETRY_INTERVAL) {
            config.retry_interval = match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_RETRY_INTERVAL,
                        value,
                        expected: "a positive number of seconds",
                    })
                }
            };
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<OperatorConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.datastore, DatastoreDriver::ConfigMap);
        assert_eq!(config.datastore_namespace, "kubevela");
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.retry_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            (ENV_DATASTORE, "Memory"),
            (ENV_DATASTORE_NAMESPACE, "velaux-db"),
            (ENV_WATCH_NAMESPACE, "team-a"),
            (ENV_LOG_FORMAT, "text"),
            (ENV_RETRY_INTERVAL, "5"),
        ])
        .unwrap();
        assert_eq!(config.datastore, DatastoreDriver::Memory);
        assert_eq!(config.datastore_namespace, "velaux-db");
        assert_eq!(config.watch_namespace.as_deref(), Some("team-a"));
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = load(&[(ENV_WATCH_NAMESPACE, ""), (ENV_DATASTORE_NAMESPACE, "  ")]).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.datastore_namespace, "kubevela");
    }

    #[test]
    fn test_unknown_values_are_rejected() {
        let err = load(&[(ENV_DATASTORE, "mongodb")]).unwrap_err();
        assert!(err.to_string().contains(ENV_DATASTORE));

        let err = load(&[(ENV_LOG_FORMAT, "xml")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: ENV_LOG_FORMAT, .. }));
    }

    #[test]
    fn test_retry_interval_must_be_positive() {
        for value in ["0", "-3", "soon"] {
            let err = load(&[(ENV_RETRY_INTERVAL, value)]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { var: ENV_RETRY_INTERVAL, .. }));
        }
    }
}
