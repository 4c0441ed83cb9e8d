//! # Error Handling
//!
//! Error types for the splitplane control plane, built on `thiserror`.
//!
//! Two layers exist:
//! - [`ConfigError`] describes why a single read of the configuration file
//!   failed. During startup it is fatal; on a later re-read it is logged and
//!   the previous desired state stays in effect.
//! - [`Error`] is the crate-level error returned by startup, the snapshot
//!   cache and the discovery server.

use std::path::PathBuf;

/// Custom result type for splitplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single configuration read
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document does not match the expected schema
    #[error("malformed configuration: {0}")]
    MalformedInput(#[from] serde_yaml::Error),

    /// The `interface` key is absent or empty
    #[error("bypass interface must be defined")]
    MissingInterface,

    /// No interface with the configured name exists
    #[error("could not find interface {0}")]
    InterfaceNotFound(String),

    /// The interface exists but has no IPv4 address bound
    #[error("no IPv4 addresses assigned to {0}")]
    NoAddressBound(String),

    /// The `urls` list is empty
    #[error("at least one URL must be configured")]
    InsufficientDomains,

    /// Interface enumeration itself failed
    #[error("failed to enumerate network interfaces: {0}")]
    Enumerate(#[source] std::io::Error),
}

/// Main error type for the splitplane control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Process configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file errors
    #[error("Configuration source error: {0}")]
    Source(#[from] ConfigError),

    /// File watch errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// xDS snapshot and protocol errors
    #[error("xDS error: {message}")]
    Xds { message: String, node_id: Option<String> },

    /// Network transport errors (gRPC listener)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create an xDS error
    pub fn xds<S: Into<String>>(message: S) -> Self {
        Self::Xds { message: message.into(), node_id: None }
    }

    /// Create an xDS error tied to a node identity
    pub fn xds_with_node<S: Into<String>, N: Into<String>>(message: S, node_id: N) -> Self {
        Self::Xds { message: message.into(), node_id: Some(node_id.into()) }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::config(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xds_error_keeps_node_id() {
        let err = Error::xds_with_node("inconsistent snapshot", "split");
        match err {
            Error::Xds { node_id, .. } => assert_eq!(node_id.as_deref(), Some("split")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn config_error_converts_into_crate_error() {
        let err: Error = ConfigError::MissingInterface.into();
        assert!(matches!(err, Error::Source(ConfigError::MissingInterface)));
        assert_eq!(
            err.to_string(),
            "Configuration source error: bypass interface must be defined"
        );
    }
}
