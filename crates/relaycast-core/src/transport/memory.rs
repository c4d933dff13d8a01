//! In-process data service.
//!
//! [`MemoryTransport`] implements the transport boundary entirely in memory.
//! Changes are published per collection with [`emit`](MemoryTransport::emit)
//! and routed to every open channel on that collection whose filter matches,
//! which is what a hosted data service does upstream. Status transitions and
//! dropped connections can be injected to exercise reconnect handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use relaycast_proto::{RawChange, TopicKey};

use super::{
    ChangeTransport, ChannelId, ChannelSpec, OpenedChannel, TransportMessage, TransportStatus,
};
use crate::error::Error;

/// Default per-channel buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

struct MemoryChannel {
    spec: ChannelSpec,
    tx: mpsc::Sender<TransportMessage>,
}

struct Inner {
    channels: Mutex<HashMap<ChannelId, MemoryChannel>>,
    next_id: AtomicU64,
    buffer_size: usize,
    auto_subscribe: AtomicBool,
    failing_opens: AtomicU32,
    opened_total: AtomicU64,
}

/// In-memory change transport.
///
/// Cloning yields another handle to the same data service.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Create a transport that acknowledges every channel on open.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create a transport with the given per-channel buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer_size: buffer_size.max(1),
                auto_subscribe: AtomicBool::new(true),
                failing_opens: AtomicU32::new(0),
                opened_total: AtomicU64::new(0),
            }),
        }
    }

    /// Whether newly opened channels are acknowledged immediately.
    pub fn set_auto_subscribe(&self, enabled: bool) {
        self.inner.auto_subscribe.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `count` open calls fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.inner.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Publish a change on a collection.
    ///
    /// Returns the number of channels the change was delivered to.
    pub async fn emit(&self, collection: &str, change: RawChange) -> usize {
        let targets: Vec<_> = {
            let channels = self.inner.channels.lock();
            channels
                .values()
                .filter(|channel| channel.spec.collection == collection)
                .filter(|channel| match (&channel.spec.filter, change.filter_row()) {
                    (Some(filter), Some(row)) => filter.matches(row),
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .map(|channel| channel.tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            if tx.send(TransportMessage::Change(change.clone())).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send a status transition to every channel serving `topic`.
    pub async fn send_status(&self, topic: &TopicKey, status: TransportStatus) -> usize {
        let targets = self.senders_for(topic);
        let mut delivered = 0;
        for tx in targets {
            if tx.send(TransportMessage::Status(status.clone())).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Acknowledge the channels serving `topic`.
    pub async fn acknowledge(&self, topic: &TopicKey) -> usize {
        self.send_status(topic, TransportStatus::Subscribed).await
    }

    /// Report a channel error on the channels serving `topic`.
    pub async fn report_error(&self, topic: &TopicKey, message: impl Into<String>) -> usize {
        self.send_status(topic, TransportStatus::ChannelError(message.into()))
            .await
    }

    /// Drop the connection of every channel serving `topic`.
    ///
    /// The channels are forgotten without a close request, so their streams
    /// end as if the network went away.
    pub fn drop_connections(&self, topic: &TopicKey) -> usize {
        let mut channels = self.inner.channels.lock();
        let before = channels.len();
        channels.retain(|_, channel| &channel.spec.topic != topic);
        before - channels.len()
    }

    /// Specs of every open channel.
    pub fn open_channels(&self) -> Vec<ChannelSpec> {
        self.inner
            .channels
            .lock()
            .values()
            .map(|channel| channel.spec.clone())
            .collect()
    }

    /// Number of open channels serving `topic`.
    pub fn open_channels_for(&self, topic: &TopicKey) -> usize {
        self.inner
            .channels
            .lock()
            .values()
            .filter(|channel| &channel.spec.topic == topic)
            .count()
    }

    /// Number of open channels.
    pub fn open_channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Number of channels ever opened.
    pub fn opened_total(&self) -> u64 {
        self.inner.opened_total.load(Ordering::SeqCst)
    }

    fn senders_for(&self, topic: &TopicKey) -> Vec<mpsc::Sender<TransportMessage>> {
        self.inner
            .channels
            .lock()
            .values()
            .filter(|channel| &channel.spec.topic == topic)
            .map(|channel| channel.tx.clone())
            .collect()
    }

    fn take_open_failure(&self) -> bool {
        self.inner
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeTransport for MemoryTransport {
    async fn open(&self, spec: &ChannelSpec) -> Result<OpenedChannel, Error> {
        if self.take_open_failure() {
            return Err(Error::Transport(format!(
                "simulated open failure for {}",
                spec.topic
            )));
        }

        let (tx, rx) = mpsc::channel(self.inner.buffer_size);
        if self.inner.auto_subscribe.load(Ordering::SeqCst) {
            tx.try_send(TransportMessage::Status(TransportStatus::Subscribed))
                .map_err(|e| Error::Transport(format!("failed to acknowledge channel: {}", e)))?;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.channels.lock().insert(
            id,
            MemoryChannel {
                spec: spec.clone(),
                tx,
            },
        );
        self.inner.opened_total.fetch_add(1, Ordering::SeqCst);

        debug!(
            channel_id = id,
            topic = %spec.topic,
            collection = %spec.collection,
            filter = ?spec.filter.as_ref().map(|f| f.to_string()),
            "memory channel opened"
        );

        Ok(OpenedChannel { id, messages: rx })
    }

    fn close(&self, id: ChannelId) {
        if let Some(channel) = self.inner.channels.lock().remove(&id) {
            debug!(channel_id = id, topic = %channel.spec.topic, "memory channel closed");
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("open_channels", &self.open_channel_count())
            .field("opened_total", &self.opened_total())
            .finish()
    }
}
