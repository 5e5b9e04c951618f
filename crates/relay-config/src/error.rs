// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

/// Errors that can occur while loading or validating the server configuration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration file could not be read from disk.
    #[error("failed to read config file '{path}': {source}")]
    FileReadError {
        /// The path that was attempted.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file's contents could not be parsed as YAML.
    #[error("failed to parse config file '{path}': {source}")]
    DeserializationError {
        /// The path whose contents failed to parse.
        path: String,
        /// The underlying parser error.
        #[source]
        source: serde_yaml::Error,
    },

    /// One or more fields failed validation. All violations are collected
    /// before returning, rather than failing on the first one.
    #[error("invalid configuration: {}", .errors.join("; "))]
    Invalid {
        /// Every validation failure found.
        errors: Vec<String>,
    },
}
