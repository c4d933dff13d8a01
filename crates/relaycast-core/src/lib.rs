//! Relaycast core.
//!
//! This crate fans change streams from an upstream data service out to
//! in-process consumers: a registry of topics sharing one transport channel
//! each, normalization of raw changes, ordered dispatch with per-callback
//! failure isolation, reconnect handling and session-wide teardown.

pub mod config;
pub mod consumers;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod metrics;
pub mod normalizer;
pub mod observer;
pub mod registry;
pub mod subscription;
pub mod transport;

pub use config::{ReconnectPolicy, RegistryConfig};
pub use consumers::{CacheInvalidator, StalenessTracker, UnreadBadge};
pub use dispatcher::{CallbackError, CallbackId, CallbackResult, DispatchReport, Dispatcher};
pub use error::{Error, TopicError};
pub use event::{ChangeEvent, TypedChange};
pub use lifecycle::SessionScope;
pub use metrics::{new_shared_metrics, FanoutMetrics, MetricsSnapshot, SharedMetrics};
pub use normalizer::{normalize, Change};
pub use observer::{FnObserver, StatusObserver, TopicStatus};
pub use registry::{Registry, SubscriptionHandle};
pub use subscription::TopicState;
pub use transport::{
    ChangeTransport, ChannelId, ChannelSpec, MemoryTransport, OpenedChannel, TransportMessage,
    TransportStatus,
};

pub use relaycast_proto as proto;
