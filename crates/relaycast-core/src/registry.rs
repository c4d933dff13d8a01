//! Channel registry.
//!
//! The registry owns every live topic. Subscribing to a key that already has
//! a live topic only appends the callback; no second channel is opened.
//! Otherwise a topic is created and its transport binding started.
//!
//! A topic whose binding is erroring or has given up is never reused as is:
//! the next subscribe replaces the binding with a fresh channel while keeping
//! the registered callbacks. Subscribing to an existing key with a different
//! collection or filter replaces the binding as well (last writer wins).
//! Filters are never merged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relaycast_proto::{ColumnFilter, TopicKey};

use crate::config::RegistryConfig;
use crate::dispatcher::{CallbackId, CallbackResult, Dispatcher};
use crate::error::Error;
use crate::event::ChangeEvent;
use crate::metrics::{new_shared_metrics, SharedMetrics};
use crate::observer::{Observers, StatusObserver};
use crate::subscription::{Shared, TopicState, TopicSubscription};
use crate::transport::{ChangeTransport, ChannelSpec};

struct TopicEntry {
    dispatcher: Arc<Dispatcher>,
    subscription: Arc<TopicSubscription>,
    task: JoinHandle<()>,
}

pub(crate) struct RegistryInner {
    shared: Arc<Shared>,
    topics: Mutex<HashMap<TopicKey, TopicEntry>>,
    next_callback_id: AtomicU64,
}

impl RegistryInner {
    fn unsubscribe(&self, topic: &TopicKey, callback_id: CallbackId) {
        let (slot, removed) = {
            let mut topics = self.topics.lock();
            let Some(entry) = topics.get(topic) else {
                return;
            };
            let Some(slot) = entry.dispatcher.detach(callback_id) else {
                return;
            };
            if entry.dispatcher.is_empty() {
                (slot, topics.remove(topic))
            } else {
                debug!(topic = %topic, callback_id, "callback removed");
                (slot, None)
            }
        };

        // Outside the registry lock: an in-flight callback may call back into it.
        slot.quiesce();

        if let Some(entry) = removed {
            entry.dispatcher.close();
            entry.subscription.close();
            debug!(topic = %topic, "last callback removed, topic closed");
        }
    }

    /// Close every topic, returning their tasks.
    pub(crate) fn close_all(&self) -> Vec<JoinHandle<()>> {
        let entries: Vec<(TopicKey, TopicEntry)> = self.topics.lock().drain().collect();

        let mut tasks = Vec::with_capacity(entries.len());
        for (topic, entry) in entries {
            entry.dispatcher.close();
            entry.subscription.close();
            debug!(topic = %topic, "topic closed");
            tasks.push(entry.task);
        }
        tasks
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let closed = self.close_all().len();
        if closed > 0 {
            debug!(topics = closed, "registry dropped, topics closed");
        }
    }
}

/// Registry of live topics.
///
/// Cloning yields another handle to the same registry. The registry is
/// meant to be owned by a session-level context and torn down with
/// [`cleanup_all`](Registry::cleanup_all) on logout or suspend.
#[derive(Clone)]
pub struct Registry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry over a transport.
    pub fn new(transport: Arc<dyn ChangeTransport>, config: RegistryConfig) -> Self {
        Self::with_metrics(transport, config, new_shared_metrics())
    }

    /// Create a registry that records into existing metrics.
    pub fn with_metrics(
        transport: Arc<dyn ChangeTransport>,
        config: RegistryConfig,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                shared: Arc::new(Shared {
                    transport,
                    observers: Observers::default(),
                    metrics,
                    config,
                }),
                topics: Mutex::new(HashMap::new()),
                next_callback_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register an observer for status transitions of every topic.
    pub fn add_observer(&self, observer: Arc<dyn StatusObserver>) {
        self.inner.shared.observers.add(observer);
    }

    /// Subscribe a callback to a topic.
    ///
    /// The callback is invoked for every change on the topic, in the order
    /// the transport produced them, until the returned handle is torn down
    /// or dropped. Must be called from within a tokio runtime.
    pub fn subscribe<F>(
        &self,
        key: impl Into<TopicKey>,
        collection: impl Into<String>,
        filter: Option<ColumnFilter>,
        callback: F,
    ) -> Result<SubscriptionHandle, Error>
    where
        F: Fn(&ChangeEvent) -> CallbackResult + Send + Sync + 'static,
    {
        let key = key.into();
        let collection = collection.into();

        if key.is_empty() {
            return Err(Error::InvalidTopic("topic key must not be empty".to_string()));
        }
        if collection.trim().is_empty() {
            return Err(Error::InvalidTopic(format!(
                "collection for topic {} must not be empty",
                key
            )));
        }

        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        let spec = ChannelSpec::new(key.clone(), collection, filter);
        let callback_id = self.inner.next_callback_id.fetch_add(1, Ordering::SeqCst);
        let shared = &self.inner.shared;

        let mut topics = self.inner.topics.lock();
        match topics.get_mut(&key) {
            Some(entry) => {
                let state = entry.subscription.state();
                let spec_changed = entry.subscription.spec() != &spec;

                if state.is_stale() || spec_changed {
                    if spec_changed {
                        warn!(
                            topic = %key,
                            previous = ?entry.subscription.spec().filter,
                            next = ?spec.filter,
                            "topic re-subscribed with a different scope, replacing its channel"
                        );
                    } else {
                        debug!(topic = %key, state = ?state, "replacing stale channel");
                    }

                    entry.subscription.retire();
                    let (subscription, task) = TopicSubscription::start(
                        spec,
                        entry.dispatcher.clone(),
                        shared.clone(),
                        &runtime,
                    );
                    entry.subscription = subscription;
                    // The retired task exits on its shutdown signal.
                    drop(std::mem::replace(&mut entry.task, task));
                }

                entry.dispatcher.register(callback_id, callback);
                debug!(
                    topic = %key,
                    callback_id,
                    callbacks = entry.dispatcher.len(),
                    "callback attached to existing topic"
                );
            }
            None => {
                let dispatcher = Arc::new(Dispatcher::new(
                    key.clone(),
                    shared.metrics.clone(),
                    shared.config.catch_callback_panics,
                ));
                dispatcher.register(callback_id, callback);

                debug!(
                    topic = %key,
                    collection = %spec.collection,
                    filter = ?spec.filter.as_ref().map(|f| f.to_string()),
                    callback_id,
                    "topic created"
                );

                let (subscription, task) =
                    TopicSubscription::start(spec, dispatcher.clone(), shared.clone(), &runtime);
                topics.insert(
                    key.clone(),
                    TopicEntry {
                        dispatcher,
                        subscription,
                        task,
                    },
                );
            }
        }
        drop(topics);

        Ok(SubscriptionHandle {
            registry: Arc::downgrade(&self.inner),
            topic: key,
            callback_id,
            released: AtomicBool::new(false),
        })
    }

    /// Remove the callback behind a handle. Same as [`SubscriptionHandle::teardown`].
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.teardown();
    }

    /// Number of registered topics.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.lock().len()
    }

    /// Keys of every registered topic, sorted.
    pub fn topic_keys(&self) -> Vec<TopicKey> {
        let mut keys: Vec<_> = self.inner.topics.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys of topics currently holding an open transport channel, sorted.
    pub fn topics_with_open_transports(&self) -> Vec<TopicKey> {
        let mut keys: Vec<_> = self
            .inner
            .topics
            .lock()
            .iter()
            .filter(|(_, entry)| entry.subscription.has_open_channel())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Current state of a topic, if registered.
    pub fn topic_state(&self, key: &str) -> Option<TopicState> {
        self.inner
            .topics
            .lock()
            .get(key)
            .map(|entry| entry.subscription.state())
    }

    /// Number of callbacks registered on a topic.
    pub fn callback_count(&self, key: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(key)
            .map(|entry| entry.dispatcher.len())
            .unwrap_or(0)
    }

    /// Collection and filter a topic is currently bound to.
    pub fn topic_spec(&self, key: &str) -> Option<ChannelSpec> {
        self.inner
            .topics
            .lock()
            .get(key)
            .map(|entry| entry.subscription.spec().clone())
    }

    /// Metrics of this registry.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.inner.shared.metrics
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("topics", &self.topic_keys())
            .field("config", &self.inner.shared.config)
            .finish()
    }
}

/// A consumer's claim on one callback registration.
///
/// [`teardown`](Self::teardown) removes the callback; when it was the last
/// one on its topic the topic's channel is closed. Tearing down more than
/// once is a no-op. Dropping the handle tears it down.
pub struct SubscriptionHandle {
    registry: Weak<RegistryInner>,
    topic: TopicKey,
    callback_id: CallbackId,
    released: AtomicBool,
}

impl SubscriptionHandle {
    /// Topic this handle is registered on.
    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Id of the registered callback.
    pub fn callback_id(&self) -> CallbackId {
        self.callback_id
    }

    /// Whether the handle has been torn down.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Remove the callback. Once this returns the callback is not invoked again.
    pub fn teardown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.topic, self.callback_id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("callback_id", &self.callback_id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn registry() -> (Registry, MemoryTransport) {
        let transport = MemoryTransport::new();
        let registry = Registry::new(Arc::new(transport.clone()), RegistryConfig::default());
        (registry, transport)
    }

    #[tokio::test]
    async fn test_rejects_empty_key() {
        let (registry, _) = registry();
        let result = registry.subscribe("", "banners", None, |_: &ChangeEvent| Ok(()));
        assert!(matches!(result, Err(Error::InvalidTopic(_))));

        let result = registry.subscribe("banners", " ", None, |_: &ChangeEvent| Ok(()));
        assert!(matches!(result, Err(Error::InvalidTopic(_))));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_requires_runtime() {
        let (registry, _) = registry();
        let result = registry.subscribe("banners", "banners", None, |_: &ChangeEvent| Ok(()));
        assert!(matches!(result, Err(Error::Runtime(_))));
    }

    #[tokio::test]
    async fn test_same_key_shares_topic() {
        let (registry, _) = registry();
        let first = registry
            .subscribe("app_config_changes", "app_config", None, |_: &ChangeEvent| Ok(()))
            .unwrap();
        let second = registry
            .subscribe("app_config_changes", "app_config", None, |_: &ChangeEvent| Ok(()))
            .unwrap();

        assert_eq!(registry.topic_count(), 1);
        assert_eq!(registry.callback_count("app_config_changes"), 2);
        assert_ne!(first.callback_id(), second.callback_id());

        first.teardown();
        assert_eq!(registry.callback_count("app_config_changes"), 1);
        second.teardown();
        assert_eq!(registry.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_outlives_registry() {
        let (registry, transport) = registry();
        let handle = registry
            .subscribe("banners", "banners", None, |_: &ChangeEvent| Ok(()))
            .unwrap();

        drop(registry);
        assert_eq!(transport.open_channel_count(), 0);

        handle.teardown();
        assert!(handle.is_released());
    }
}
