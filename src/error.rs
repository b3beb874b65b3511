//! Error types shared by the builder, the execution engine and the weight codec.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while building, running or persisting a network.
#[derive(Debug, Error)]
pub enum NetError {
    /// Malformed or inconsistent architecture description.
    #[error("configuration error: {0}")]
    Config(String),

    /// Weight file missing, unreadable or truncated.
    #[error("weight file error ({}): {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Backward propagation was requested outside training mode.
    #[error("backward pass requires a prior forward pass in training mode")]
    NotTraining,

    #[error("architecture parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        NetError::Config(message.into())
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        NetError::File {
            path: path.into(),
            source,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NetError>;
