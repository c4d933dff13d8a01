//! Replay error types.

use thiserror::Error;

/// Errors raised by the replay tool.
#[derive(Debug, Error)]
pub enum Error {
    /// A `--topic` argument could not be parsed.
    #[error("invalid topic argument: {0}")]
    InvalidTopic(String),

    /// A line of the change log could not be decoded.
    #[error("line {line}: {source}")]
    Log {
        /// 1-based line number.
        line: usize,
        /// Underlying decode error.
        source: relaycast_proto::Error,
    },

    /// Reading the change log failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The fan-out core rejected a request.
    #[error(transparent)]
    Core(#[from] relaycast_core::Error),

    /// Serializing the report failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
