//! Change normalization.
//!
//! Converts raw transport payloads into one canonical shape: inserts carry
//! only a new row, deletes only an old row, updates both. Row contents are
//! passed through untouched.

use relaycast_proto::{ChangeKind, Error, RawChange, Row};

/// A canonical change that has not been sequenced yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Operation kind.
    pub kind: ChangeKind,
    /// Row after the change.
    pub new: Option<Row>,
    /// Row before the change.
    pub old: Option<Row>,
    /// Commit position reported by the data service.
    pub commit_sequence: Option<u64>,
    /// Commit timestamp reported by the data service.
    pub commit_timestamp: Option<String>,
}

/// Normalize a raw change.
///
/// Snapshots that do not belong to the operation kind are discarded. An
/// update without a previous row gets an empty one, since data services
/// commonly omit it unless full row identity is configured.
pub fn normalize(raw: RawChange) -> Result<Change, Error> {
    let kind = raw.kind()?;

    let (new, old) = match kind {
        ChangeKind::Insert => {
            let new = raw.record.ok_or(Error::MissingSnapshot {
                kind,
                snapshot: "new",
            })?;
            (Some(new), None)
        }
        ChangeKind::Update => {
            let new = raw.record.ok_or(Error::MissingSnapshot {
                kind,
                snapshot: "new",
            })?;
            (Some(new), Some(raw.old_record.unwrap_or_default()))
        }
        ChangeKind::Delete => {
            let old = raw.old_record.ok_or(Error::MissingSnapshot {
                kind,
                snapshot: "old",
            })?;
            (None, Some(old))
        }
    };

    Ok(Change {
        kind,
        new,
        old,
        commit_sequence: raw.commit_sequence,
        commit_timestamp: raw.commit_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycast_proto::Value;

    #[test]
    fn test_insert() {
        let row = Row::new().with("id", "n1").with("is_read", false);
        let change = normalize(RawChange::insert(row.clone())).unwrap();

        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.new, Some(row));
        assert_eq!(change.old, None);
    }

    #[test]
    fn test_insert_drops_stray_old_row() {
        let raw = RawChange::insert(Row::new().with("id", "n1")).with_old_record(Row::new());
        let change = normalize(raw).unwrap();
        assert!(change.old.is_none());
    }

    #[test]
    fn test_update_keeps_both_rows() {
        let raw = RawChange::update(
            Row::new().with("value", "dark"),
            Row::new().with("value", "light"),
        )
        .with_commit_sequence(12)
        .with_commit_timestamp("2024-05-01T10:00:00Z");
        let change = normalize(raw).unwrap();

        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.new.unwrap().get("value"), Some(&Value::from("dark")));
        assert_eq!(change.old.unwrap().get("value"), Some(&Value::from("light")));
        assert_eq!(change.commit_sequence, Some(12));
        assert_eq!(change.commit_timestamp.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_update_without_old_row() {
        let raw = RawChange::new("UPDATE").with_record(Row::new().with("id", 1));
        let change = normalize(raw).unwrap();
        assert_eq!(change.old, Some(Row::new()));
    }

    #[test]
    fn test_delete() {
        let raw = RawChange::delete(Row::new().with("id", "n1")).with_record(Row::new());
        let change = normalize(raw).unwrap();

        assert_eq!(change.kind, ChangeKind::Delete);
        assert!(change.new.is_none());
        assert_eq!(change.old.unwrap().get("id"), Some(&Value::from("n1")));
    }

    #[test]
    fn test_missing_snapshot() {
        let err = normalize(RawChange::new("INSERT")).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingSnapshot {
                kind: ChangeKind::Insert,
                snapshot: "new"
            }
        ));

        let err = normalize(RawChange::new("DELETE")).unwrap_err();
        assert!(matches!(err, Error::MissingSnapshot { snapshot: "old", .. }));
    }

    #[test]
    fn test_unknown_operation() {
        let err = normalize(RawChange::new("TRUNCATE")).unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(_)));
    }

    #[test]
    fn test_values_pass_through() {
        let row = Row::new()
            .with("created_at", "2024-05-01T10:00:00.123456+00:00")
            .with("amount", 10.50)
            .with("count", 3);
        let change = normalize(RawChange::insert(row.clone())).unwrap();
        assert_eq!(change.new, Some(row));
    }
}
