//! Topic keys.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Unique name of a logical subscription topic.
///
/// Usually the collection name, optionally combined with a filter value
/// (`notifications_user42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicKey(String);

impl TopicKey {
    /// Create a topic key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a collection scoped to one filter value.
    pub fn scoped(collection: &str, value: &Value) -> Self {
        Self(format!("{}_{}", collection, value))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty (never valid for a subscription).
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TopicKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TopicKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for TopicKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&TopicKey> for TopicKey {
    fn from(key: &TopicKey) -> Self {
        key.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_key() {
        let key = TopicKey::scoped("notifications", &Value::from("user42"));
        assert_eq!(key.as_str(), "notifications_user42");
    }

    #[test]
    fn test_empty_key() {
        assert!(TopicKey::new("  ").is_empty());
        assert!(!TopicKey::from("app_config_changes").is_empty());
    }
}
