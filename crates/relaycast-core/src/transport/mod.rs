//! Upstream data service boundary.
//!
//! A [`ChangeTransport`] opens one change-stream channel per topic, scoped
//! to a collection and an optional column filter. Each open channel yields
//! an ordered stream of [`TransportMessage`]s: change notifications
//! interleaved with out-of-band status transitions. The stream ending
//! without a close request means the connection was lost.

mod memory;

pub use memory::{MemoryTransport, DEFAULT_BUFFER_SIZE};

use async_trait::async_trait;
use tokio::sync::mpsc;

use relaycast_proto::{ColumnFilter, RawChange, TopicKey};

use crate::error::Error;

/// Identifier the transport assigns to an open channel.
pub type ChannelId = u64;

/// What a topic asks the transport to stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// Topic the channel serves.
    pub topic: TopicKey,
    /// Collection whose changes are streamed.
    pub collection: String,
    /// Optional column-equality predicate evaluated by the data service.
    pub filter: Option<ColumnFilter>,
}

impl ChannelSpec {
    /// Create a channel spec.
    pub fn new(
        topic: impl Into<TopicKey>,
        collection: impl Into<String>,
        filter: Option<ColumnFilter>,
    ) -> Self {
        Self {
            topic: topic.into(),
            collection: collection.into(),
            filter,
        }
    }
}

/// Out-of-band channel status reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// The channel is (re)joining.
    Connecting,
    /// The data service acknowledged the subscription.
    Subscribed,
    /// The channel failed; a self-healing transport may recover later.
    ChannelError(String),
    /// The subscription was not acknowledged in time.
    TimedOut,
    /// The data service closed the channel.
    Closed,
}

/// One item on an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    /// Status transition.
    Status(TransportStatus),
    /// Change notification.
    Change(RawChange),
}

/// An opened channel: its id and the receiving end of its stream.
#[derive(Debug)]
pub struct OpenedChannel {
    /// Id used to close the channel.
    pub id: ChannelId,
    /// Ordered stream of messages for this channel.
    pub messages: mpsc::Receiver<TransportMessage>,
}

/// Capability to open and close change-stream channels.
#[async_trait]
pub trait ChangeTransport: Send + Sync + 'static {
    /// Open a channel for the given spec.
    async fn open(&self, spec: &ChannelSpec) -> Result<OpenedChannel, Error>;

    /// Release a channel. Must not block; closing an unknown or already
    /// closed channel is a no-op.
    fn close(&self, id: ChannelId);
}
