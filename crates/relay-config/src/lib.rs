// SPDX-License-Identifier: Apache-2.0

//! Server configuration: the on-disk model (YAML), environment overrides,
//! and collect-all-errors validation described by the data model's
//! configuration table (`self_server`, `pool`, `limits`, `session_table`,
//! `monitor`, `logging`).
//!
//! Precedence is file < environment: a YAML document is parsed first, then
//! any `RELAY__SECTION__FIELD` environment variable overwrites the matching
//! key before the document is deserialized into [`Config`]. Double
//! underscores separate nesting levels, e.g. `RELAY__SELF_SERVER__PORT=9001`
//! overrides `self_server.port`.

pub mod byte_units;
pub mod error;
pub mod policy;

pub use error::Error;
pub use policy::{PoolBounds, PoolPolicy};

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

const ENV_PREFIX: &str = "RELAY__";

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_shards() -> usize {
    1024
}

fn default_monitor_interval_ms() -> u64 {
    1_000
}

fn default_max_body_bytes() -> u32 {
    1024 * 1024
}

/// The address the acceptor (C7) binds to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SelfServerConfig {
    /// Bind host. Defaults to all interfaces.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for SelfServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Per-connection limits enforced by the framer (C3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum accepted body length. Accepts a bare byte count or a
    /// human-friendly size string such as `"4 MiB"`. Defaults to 1 MiB.
    #[serde(default, deserialize_with = "byte_units::deserialize")]
    pub max_body_bytes: Option<u32>,
}

impl LimitsConfig {
    /// The effective maximum body length, falling back to the 1 MiB default.
    #[must_use]
    pub fn max_body_bytes(&self) -> u32 {
        self.max_body_bytes.unwrap_or_else(default_max_body_bytes)
    }
}

/// Sharding for the acceptor's session table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionTableConfig {
    /// Number of independently locked shards. Defaults to 1024.
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for SessionTableConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
        }
    }
}

/// Sampling cadence for the system monitor (C1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Milliseconds between samples. Defaults to 1000.
    #[serde(default = "default_monitor_interval_ms")]
    pub update_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_monitor_interval_ms(),
        }
    }
}

/// Logging verbosity, from quietest to loudest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

/// Logging sink configuration (C9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level that reaches the sink.
    #[serde(default)]
    pub level: LogLevel,
}

/// The complete, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Listener bind address.
    pub self_server: SelfServerConfig,
    /// I/O proactor pool and logic worker pool bounds.
    pub pool: PoolPolicy,
    /// Per-connection limits.
    pub limits: LimitsConfig,
    /// Acceptor session table sharding.
    pub session_table: SessionTableConfig,
    /// System monitor sampling cadence.
    pub monitor: MonitorConfig,
    /// Logging sink configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads and validates configuration from a YAML file at `path`,
    /// applying any `RELAY__`-prefixed environment overrides on top.
    pub fn load(path: &Path) -> Result<Config, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::FileReadError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text, &path.display().to_string())
    }

    /// Parses `text` as YAML, applies environment overrides, and validates
    /// the result. Exposed separately from [`Config::load`] so tests don't
    /// need a filesystem round trip.
    pub fn from_yaml_str(text: &str, source_label: &str) -> Result<Config, Error> {
        let mut value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|source| Error::DeserializationError {
                path: source_label.to_string(),
                source,
            })?;
        apply_env_overrides(&mut value);
        let config: Config =
            serde_yaml::from_value(value).map_err(|source| Error::DeserializationError {
                path: source_label.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Collects every validation failure rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Error> {
        let ncpu = available_parallelism();
        let mut errors = self.pool.validation_errors(ncpu);
        if self.session_table.shards == 0 {
            errors.push("session_table.shards must be greater than 0".to_string());
        }
        if self.monitor.update_interval_ms == 0 {
            errors.push("monitor.update_interval_ms must be greater than 0".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Invalid { errors })
        }
    }

    /// Resolved `(min, max)` bounds for the I/O proactor pool, given the
    /// host's available parallelism.
    #[must_use]
    pub fn io_pool_bounds(&self) -> (usize, usize) {
        self.pool.io.resolve(available_parallelism())
    }

    /// Resolved `(min, max)` bounds for the logic worker pool.
    #[must_use]
    pub fn worker_pool_bounds(&self) -> (usize, usize) {
        self.pool.worker.resolve(available_parallelism())
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn apply_env_overrides(value: &mut serde_yaml::Value) {
    for (key, raw) in std::env::vars() {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest.split("__").map(|s| s.to_lowercase()).collect();
        if path.iter().any(String::is_empty) {
            continue;
        }
        set_path(value, &path, &raw);
    }
}

fn set_path(value: &mut serde_yaml::Value, path: &[String], raw: &str) {
    let Some((head, tail)) = path.split_first() else {
        return;
    };
    if !matches!(value, serde_yaml::Value::Mapping(_)) {
        *value = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    let serde_yaml::Value::Mapping(mapping) = value else {
        unreachable!("just normalized to a mapping");
    };
    let key = serde_yaml::Value::String(head.clone());
    if tail.is_empty() {
        mapping.insert(key, parse_scalar(raw));
        return;
    }
    if !mapping.contains_key(&key) {
        mapping.insert(key.clone(), serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    }
    set_path(mapping.get_mut(&key).expect("just inserted"), tail, raw);
}

fn parse_scalar(raw: &str) -> serde_yaml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return serde_yaml::Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return serde_yaml::Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        return serde_yaml::Value::Number(f.into());
    }
    serde_yaml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.self_server.port, 7878);
        assert_eq!(config.limits.max_body_bytes(), 1024 * 1024);
    }

    #[test]
    fn parses_minimal_document() {
        let config = Config::from_yaml_str("self_server:\n  port: 9001\n", "<test>").unwrap();
        assert_eq!(config.self_server.port, 9001);
        assert_eq!(config.self_server.host, "0.0.0.0");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Config::from_yaml_str("bogus_section: 1\n", "<test>").unwrap_err();
        assert!(matches!(err, Error::DeserializationError { .. }));
    }

    #[test]
    fn invalid_pool_bounds_are_collected() {
        let yaml = "pool:\n  io:\n    min: 10\n    max: 2\n  worker:\n    min: 8\n    max: 1\n";
        let err = Config::from_yaml_str(yaml, "<test>").unwrap_err();
        match err {
            Error::Invalid { errors } => assert_eq!(errors.len(), 2),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn env_override_nests_by_double_underscore() {
        std::env::set_var("RELAY__SELF_SERVER__PORT", "4242");
        let config = Config::from_yaml_str("self_server:\n  port: 1\n", "<test>").unwrap();
        std::env::remove_var("RELAY__SELF_SERVER__PORT");
        assert_eq!(config.self_server.port, 4242);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/relay.yaml")).unwrap_err();
        assert!(matches!(err, Error::FileReadError { .. }));
    }

    #[test]
    fn load_reads_from_disk() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "self_server:\n  port: 5555\n").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.self_server.port, 5555);
    }
}
