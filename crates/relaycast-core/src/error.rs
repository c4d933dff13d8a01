//! Core error types.

use thiserror::Error;

/// Errors returned to callers of the registry and transports.
#[derive(Debug, Error)]
pub enum Error {
    /// Topic key or collection name is unusable.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// The transport failed to open or serve a channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// A payload could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(#[from] relaycast_proto::Error),

    /// No tokio runtime is available to drive topic tasks.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Errors reported to status observers for a single topic.
///
/// These never fail a subscribe call; they describe why a topic is not
/// currently receiving events so that a consumer can show stale data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// The transport reported a channel error.
    #[error("channel error: {0}")]
    Channel(String),

    /// The transport gave up waiting for an acknowledgment.
    #[error("channel timed out")]
    TimedOut,

    /// The transport stream ended without a close request.
    #[error("connection lost")]
    ConnectionLost,

    /// Opening a fresh channel failed.
    #[error("failed to open channel: {0}")]
    OpenFailed(String),

    /// Reconnection gave up; the topic is closed.
    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted {
        /// Number of reconnect attempts made.
        attempts: u32,
    },
}
