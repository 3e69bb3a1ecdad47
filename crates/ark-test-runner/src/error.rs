//! Error types for the test runner.
//!
//! Per-test problems never surface here: they are folded into the
//! [`TestResult`](crate::case::TestResult) of the test that hit them.
//! Everything in this module aborts suite setup before any test is scheduled.

use std::path::PathBuf;

/// Malformed test metadata
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("test header /*--- ... ---*/ not found")]
    MissingHeader,
}

/// Toolchain binaries that a suite needs but cannot find
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("Cannot find {tool} binary: {}", path.display())]
    BinaryNotFound { tool: &'static str, path: PathBuf },

    #[error("{0} requires --js-runtime to point at the ark_js_vm directory")]
    NoJsRuntime(&'static str),
}

/// Failures while fetching or flattening an external conformance suite
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {detail}")]
    Git { command: String, detail: String },
}

impl PrepareError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepareError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration file problems
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid filter pattern '{pattern}': {source}")]
    Filter {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Suite-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Prepare(#[from] PrepareError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
