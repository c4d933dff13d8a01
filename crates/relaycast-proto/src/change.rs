//! Raw change payloads as produced by the data service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::row::Row;

/// Kinds of mutation a change stream reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A new row was inserted.
    Insert,
    /// An existing row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl ChangeKind {
    /// The wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            _ => Err(Error::UnknownOperation(s.to_string())),
        }
    }
}

/// A change notification exactly as the transport delivered it.
///
/// The operation tag is kept as text so that an unrecognised tag surfaces
/// as a normalisation error instead of a transport decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    /// Operation tag (`INSERT`, `UPDATE`, `DELETE`).
    #[serde(rename = "type", alias = "eventType", alias = "operation")]
    pub operation: String,
    /// Row after the change.
    #[serde(default, alias = "new")]
    pub record: Option<Row>,
    /// Row before the change.
    #[serde(default, alias = "old")]
    pub old_record: Option<Row>,
    /// Monotonic commit position, when the data service exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sequence: Option<u64>,
    /// Commit timestamp, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
}

impl RawChange {
    /// Create a raw change with the given operation tag.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            record: None,
            old_record: None,
            commit_sequence: None,
            commit_timestamp: None,
        }
    }

    /// An insert carrying the new row.
    pub fn insert(record: Row) -> Self {
        Self::new(ChangeKind::Insert.as_str()).with_record(record)
    }

    /// An update carrying both snapshots.
    pub fn update(record: Row, old_record: Row) -> Self {
        Self::new(ChangeKind::Update.as_str())
            .with_record(record)
            .with_old_record(old_record)
    }

    /// A delete carrying the previous row.
    pub fn delete(old_record: Row) -> Self {
        Self::new(ChangeKind::Delete.as_str()).with_old_record(old_record)
    }

    /// Set the new row snapshot.
    pub fn with_record(mut self, record: Row) -> Self {
        self.record = Some(record);
        self
    }

    /// Set the old row snapshot.
    pub fn with_old_record(mut self, old_record: Row) -> Self {
        self.old_record = Some(old_record);
        self
    }

    /// Set the commit sequence.
    pub fn with_commit_sequence(mut self, sequence: u64) -> Self {
        self.commit_sequence = Some(sequence);
        self
    }

    /// Set the commit timestamp.
    pub fn with_commit_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.commit_timestamp = Some(timestamp.into());
        self
    }

    /// Parse the operation tag.
    pub fn kind(&self) -> Result<ChangeKind, Error> {
        self.operation.parse()
    }

    /// Decode a raw change from a JSON payload.
    pub fn from_json(payload: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(payload)?)
    }

    /// The row a column filter should be evaluated against.
    ///
    /// Deletes only carry the old row, so that is used when no new row exists.
    pub fn filter_row(&self) -> Option<&Row> {
        self.record.as_ref().or(self.old_record.as_ref())
    }
}
