//! Canonical change events delivered to consumers.

use serde::de::DeserializeOwned;
use serde::Serialize;

use relaycast_proto::{ChangeKind, Row, TopicKey};

/// A single normalized mutation, stamped with its per-topic sequence number.
///
/// Events are immutable once constructed; consumers only receive shared
/// references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    kind: ChangeKind,
    new: Option<Row>,
    old: Option<Row>,
    topic: TopicKey,
    sequence: u64,
    commit_timestamp: Option<String>,
}

impl ChangeEvent {
    pub(crate) fn new(topic: TopicKey, sequence: u64, change: crate::normalizer::Change) -> Self {
        Self {
            kind: change.kind,
            new: change.new,
            old: change.old,
            topic,
            sequence,
            commit_timestamp: change.commit_timestamp,
        }
    }

    /// Operation kind.
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Row after the change (inserts and updates).
    pub fn new_row(&self) -> Option<&Row> {
        self.new.as_ref()
    }

    /// Row before the change (updates and deletes).
    pub fn old_row(&self) -> Option<&Row> {
        self.old.as_ref()
    }

    /// Topic the event was delivered on.
    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Arrival sequence number, monotonic per topic and starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Commit timestamp reported by the data service, if any.
    pub fn commit_timestamp(&self) -> Option<&str> {
        self.commit_timestamp.as_deref()
    }

    /// Decode both snapshots into a consumer-defined row type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<TypedChange<T>, relaycast_proto::Error> {
        Ok(TypedChange {
            kind: self.kind,
            new: self.new.as_ref().map(|row| row.decode::<T>()).transpose()?,
            old: self.old.as_ref().map(|row| row.decode::<T>()).transpose()?,
            sequence: self.sequence,
        })
    }
}

/// A change event with rows decoded into `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedChange<T> {
    /// Operation kind.
    pub kind: ChangeKind,
    /// Decoded row after the change.
    pub new: Option<T>,
    /// Decoded row before the change.
    pub old: Option<T>,
    /// Arrival sequence number.
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Change;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Banner {
        id: i64,
        title: String,
    }

    #[test]
    fn test_decode_typed_change() {
        let change = Change {
            kind: ChangeKind::Update,
            new: Some(Row::new().with("id", 1).with("title", "Spring sale")),
            old: Some(Row::new().with("id", 1).with("title", "Winter sale")),
            commit_sequence: None,
            commit_timestamp: None,
        };
        let event = ChangeEvent::new(TopicKey::from("banners"), 3, change);

        let typed: TypedChange<Banner> = event.decode().unwrap();
        assert_eq!(typed.kind, ChangeKind::Update);
        assert_eq!(typed.sequence, 3);
        assert_eq!(typed.new.unwrap().title, "Spring sale");
        assert_eq!(typed.old.unwrap().title, "Winter sale");
    }
}
