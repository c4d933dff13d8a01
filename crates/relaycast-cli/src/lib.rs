//! Relaycast replay tool.
//!
//! Replays a JSON-lines change log through the fan-out core using the
//! in-memory data service, and reports what every topic received.

pub mod config;
pub mod error;
pub mod replay;

pub use config::{Args, OutputFormat, ReplayConfig, TopicArg};
pub use error::Error;
pub use replay::{parse_log, replay, LogEntry, ReplayReport, TopicReport};
