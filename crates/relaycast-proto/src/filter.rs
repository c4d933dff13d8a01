//! Column-equality filters for change streams.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;

/// A `column = value` predicate scoping a change stream.
///
/// The predicate is evaluated upstream by the transport; the fan-out layer
/// only carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    /// Column to compare.
    pub column: String,
    /// Value the column must equal.
    pub value: Value,
}

impl ColumnFilter {
    /// Create an equality filter.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Check whether a row satisfies this filter.
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

impl fmt::Display for ColumnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for ColumnFilter {
    type Err = Error;

    /// Parse `column=value` or `column=eq.value`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, value) = s
            .split_once('=')
            .ok_or_else(|| Error::InvalidFilter(format!("expected column=value, got '{}'", s)))?;

        let column = column.trim();
        if column.is_empty() {
            return Err(Error::InvalidFilter(format!("missing column in '{}'", s)));
        }

        let value = value.strip_prefix("eq.").unwrap_or(value);
        Ok(Self::eq(column, Value::parse_literal(value)))
    }
}
