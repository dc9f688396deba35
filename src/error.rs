// src/error.rs

//! Error types for sinks, the pipeline chain, and the surrounding process.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for process-level operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure raised by a single sink while handling one item.
///
/// Not-applicable items never produce a `SinkError`; they pass through.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Missing or invalid endpoint, credentials, or other settings.
    /// Never retried by the pipeline.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local filesystem failure
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Remote store, queue, or index failure (including timeouts and
    /// missing acknowledgments)
    #[error("{backend} error: {message}")]
    Backend { backend: String, message: String },
}

impl SinkError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a filesystem error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a backend error.
    pub fn backend(backend: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// A chain failure: which sink failed, for which item, and why.
#[derive(Error, Debug)]
#[error("item {item_id} failed at sink {sink} (#{index}): {source}")]
pub struct ChainError {
    pub index: usize,
    pub sink: String,
    pub item_id: String,
    #[source]
    pub source: SinkError,
}

/// Process-level error type (configuration loading, item parsing, CLI).
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Item record could not be turned into an item
    #[error("Invalid item on line {line}: {message}")]
    Item { line: usize, message: String },

    /// A sink failed while building the chain
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// An item failed inside the chain
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an item parsing error.
    pub fn item(line: usize, message: impl fmt::Display) -> Self {
        Self::Item {
            line,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_names_sink_and_item() {
        let err = ChainError {
            index: 1,
            sink: "ObjectStorageSink".to_string(),
            item_id: "https://example.com/a".to_string(),
            source: SinkError::backend("s3", "access denied"),
        };

        assert_eq!(
            err.to_string(),
            "item https://example.com/a failed at sink ObjectStorageSink (#1): s3 error: access denied"
        );
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = SinkError::io(
            "out/a.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("out/a.txt"));
        assert!(!err.is_configuration());
        assert!(SinkError::config("no bucket").is_configuration());
    }
}
