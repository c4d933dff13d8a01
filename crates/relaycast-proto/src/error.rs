//! Payload error types.

use thiserror::Error;

/// Errors raised while interpreting change payloads.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation tag is not one of insert, update or delete.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// A row snapshot required by the operation kind is missing.
    #[error("{kind} change is missing its {snapshot} row snapshot")]
    MissingSnapshot {
        /// Operation kind of the offending change.
        kind: crate::ChangeKind,
        /// Which snapshot was absent ("new" or "old").
        snapshot: &'static str,
    },

    /// A column filter could not be parsed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A row could not be decoded into the requested type.
    #[error("decode error: {0}")]
    Decode(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
