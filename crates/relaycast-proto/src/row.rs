//! Row snapshots.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// An opaque record: field name to value.
///
/// The fan-out layer never inspects columns itself. Consumers that know a
/// topic's schema can [`decode`](Row::decode) the snapshot into their own type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a field, builder style.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Get a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Decode the row into a consumer-defined type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let json = serde_json::to_value(self)?;
        serde_json::from_value(json).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, Value>> for Row {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Notification {
        id: String,
        is_read: bool,
    }

    #[test]
    fn test_row_builder() {
        let row = Row::new().with("id", "n1").with("is_read", false);

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("id"), Some(&Value::from("n1")));
        assert_eq!(row.get("is_read").and_then(Value::as_bool), Some(false));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_decode_typed_row() {
        let row = Row::new().with("id", "n1").with("is_read", true).with("extra", 1);
        let decoded: Notification = row.decode().unwrap();

        assert_eq!(
            decoded,
            Notification {
                id: "n1".to_string(),
                is_read: true
            }
        );
    }

    #[test]
    fn test_decode_mismatch() {
        let row = Row::new().with("id", 5);
        let result: Result<Notification, Error> = row.decode();
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_row_json_shape() {
        let row: Row = serde_json::from_str(r#"{"id": "n1", "is_read": false}"#).unwrap();
        assert_eq!(row, Row::new().with("id", "n1").with("is_read", false));
    }
}
