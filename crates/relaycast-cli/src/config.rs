//! Replay configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use relaycast_core::config::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF};
use relaycast_core::transport::DEFAULT_BUFFER_SIZE;
use relaycast_core::{ReconnectPolicy, RegistryConfig};
use relaycast_proto::{ColumnFilter, TopicKey};

use crate::error::Error;

/// Default time allowed for every topic to be acknowledged.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default time allowed for in-flight events to drain after the last change.
pub const DEFAULT_DRAIN_MS: u64 = 100;

/// One `--topic` argument: `key=collection[:column=value]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicArg {
    pub key: TopicKey,
    pub collection: String,
    pub filter: Option<ColumnFilter>,
}

impl FromStr for TopicArg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, rest) = s
            .split_once('=')
            .ok_or_else(|| Error::InvalidTopic(format!("expected key=collection, got '{}'", s)))?;

        let key = TopicKey::new(key.trim());
        if key.is_empty() {
            return Err(Error::InvalidTopic(format!("missing topic key in '{}'", s)));
        }

        let (collection, filter) = match rest.split_once(':') {
            Some((collection, filter)) => {
                let filter = filter
                    .parse::<ColumnFilter>()
                    .map_err(|e| Error::InvalidTopic(e.to_string()))?;
                (collection, Some(filter))
            }
            None => (rest, None),
        };

        let collection = collection.trim();
        if collection.is_empty() {
            return Err(Error::InvalidTopic(format!("missing collection in '{}'", s)));
        }

        Ok(Self {
            key,
            collection: collection.to_string(),
            filter,
        })
    }
}

/// Report format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Replay report as JSON.
    #[default]
    Json,
    /// Fan-out counters in Prometheus text format.
    Prometheus,
}

/// Replay settings.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Change log to read. `None` reads standard input.
    pub log_path: Option<PathBuf>,

    /// Topics to subscribe before replaying.
    pub topics: Vec<TopicArg>,

    /// Registry configuration.
    pub registry: RegistryConfig,

    /// Per-channel buffer of the in-memory data service.
    pub buffer_size: usize,

    /// Time allowed for every topic to be acknowledged.
    pub connect_timeout: Duration,

    /// Time allowed for in-flight events to drain.
    pub drain: Duration,

    /// Report format.
    pub format: OutputFormat,
}

impl ReplayConfig {
    /// Create a configuration replaying standard input.
    pub fn new() -> Self {
        Self {
            log_path: None,
            topics: Vec::new(),
            registry: RegistryConfig::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            drain: Duration::from_millis(DEFAULT_DRAIN_MS),
            format: OutputFormat::default(),
        }
    }

    /// Add a topic.
    pub fn with_topic(mut self, topic: TopicArg) -> Self {
        self.topics.push(topic);
        self
    }

    /// Set the registry configuration.
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the drain time.
    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.drain = drain;
        self
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Command-line arguments for the replay tool.
#[derive(Parser, Debug)]
#[command(name = "relaycast-replay")]
#[command(version, about = "Replay a change log through the Relaycast fan-out core", long_about = None)]
pub struct Args {
    /// JSON-lines change log (`{"collection": ..., "change": {...}}` per line).
    /// Reads standard input when omitted.
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Topic to subscribe, as key=collection[:column=value]. Repeatable.
    #[arg(short, long = "topic", required = true)]
    pub topics: Vec<TopicArg>,

    /// Initial reconnect backoff in milliseconds.
    #[arg(long, default_value_t = DEFAULT_INITIAL_BACKOFF.as_millis() as u64)]
    pub initial_backoff_ms: u64,

    /// Maximum reconnect backoff in milliseconds.
    #[arg(long, default_value_t = DEFAULT_MAX_BACKOFF.as_millis() as u64)]
    pub max_backoff_ms: u64,

    /// Reconnect attempts before a topic gives up.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Reopen channels on channel errors instead of waiting for the
    /// transport to recover.
    #[arg(long)]
    pub no_self_heal: bool,

    /// Per-channel buffer size.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Milliseconds allowed for every topic to be acknowledged.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,

    /// Milliseconds to wait for in-flight events after the last change.
    #[arg(long, default_value_t = DEFAULT_DRAIN_MS)]
    pub drain_ms: u64,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

impl Args {
    /// Convert command-line arguments to a replay configuration.
    pub fn into_config(self) -> ReplayConfig {
        let reconnect = ReconnectPolicy::new()
            .with_initial_backoff(Duration::from_millis(self.initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
            .with_max_attempts(self.max_attempts)
            .with_transport_self_heals(!self.no_self_heal);

        ReplayConfig {
            log_path: self.log,
            topics: self.topics,
            registry: RegistryConfig::new().with_reconnect(reconnect),
            buffer_size: self.buffer_size.max(1),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            drain: Duration::from_millis(self.drain_ms),
            format: self.format,
        }
    }
}
