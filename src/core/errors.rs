//! LHM-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LhmError>;

/// Top-level error type for the capture toolkit.
#[derive(Debug, Error)]
pub enum LhmError {
    #[error("[LHM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[LHM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[LHM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LHM-2001] transport failure: {details}")]
    Transport { details: String },

    #[error("[LHM-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[LHM-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LHM-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl LhmError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LHM-1001",
            Self::MissingConfig { .. } => "LHM-1002",
            Self::ConfigParse { .. } => "LHM-1003",
            Self::Transport { .. } => "LHM-2001",
            Self::Serialization { .. } => "LHM-2101",
            Self::Io { .. } => "LHM-3002",
            Self::Runtime { .. } => "LHM-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for LhmError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for LhmError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for LhmError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
