//! Relaycast payload types.
//!
//! This crate defines the schema-agnostic data model shared between the
//! change-fan-out core and its consumers: field values, row snapshots, raw
//! change notifications, column filters and topic keys.

pub mod change;
pub mod error;
pub mod filter;
pub mod row;
pub mod topic;
pub mod value;

pub use change::{ChangeKind, RawChange};
pub use error::Error;
pub use filter::ColumnFilter;
pub use row::Row;
pub use topic::TopicKey;
pub use value::Value;
