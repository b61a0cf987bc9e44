//! Error types shared across hoist-core

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur when working with configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error("invalid configuration: {0}")]
    Deserialize(#[from] Box<figment::Error>),

    /// Configuration file not found after searching all locations.
    #[error("no configuration file found")]
    NotFound,

    /// A required setting is absent.
    #[error("missing configuration: {0}")]
    Missing(&'static str),
}

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Coarse classification of failures, used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing credentials, unknown targets, malformed settings.
    Configuration,
    /// The repository or changelog is not in a releasable state.
    Precondition,
    /// A looked-up resource does not exist.
    NotFound,
    /// A resource exists and conflicts with the requested change.
    Conflict,
    /// A network, process, or filesystem call failed.
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configuration => "configuration",
            Self::Precondition => "precondition",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Transport => "transport",
        })
    }
}
