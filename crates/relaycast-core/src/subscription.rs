//! Topic subscriptions and their transport lifecycle.
//!
//! A [`TopicSubscription`] binds one topic to one transport channel at a
//! time and runs as a background task:
//!
//! ```text
//! Connecting -> Subscribed -> (Erroring -> Connecting)* -> Closed
//!                                     \-> Failed (reconnect attempts exhausted)
//! ```
//!
//! Channel errors are surfaced to status observers without collapsing the
//! topic. A dropped stream, or a channel error on a transport that does not
//! self-heal, is reopened with exponential backoff. `Closed` and `Failed`
//! are terminal: no event is dispatched once either is reached, even if the
//! transport still had events queued.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use relaycast_proto::RawChange;

use crate::config::RegistryConfig;
use crate::dispatcher::Dispatcher;
use crate::error::TopicError;
use crate::metrics::SharedMetrics;
use crate::normalizer::normalize;
use crate::observer::{Observers, TopicStatus};
use crate::transport::{ChangeTransport, ChannelId, ChannelSpec, TransportMessage, TransportStatus};

/// Lifecycle state of a topic's transport binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    /// Opening a channel or waiting for acknowledgment.
    Connecting,
    /// Acknowledged and receiving events.
    Subscribed,
    /// The transport reported a failure; recovery is pending.
    Erroring,
    /// Torn down explicitly.
    Closed,
    /// Closed because reconnect attempts were exhausted.
    Failed,
}

impl TopicState {
    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TopicState::Closed | TopicState::Failed)
    }

    /// Whether the binding should be replaced on the next subscribe.
    pub fn is_stale(&self) -> bool {
        matches!(self, TopicState::Erroring | TopicState::Failed)
    }
}

/// State shared by every topic of one registry.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn ChangeTransport>,
    pub(crate) observers: Observers,
    pub(crate) metrics: SharedMetrics,
    pub(crate) config: RegistryConfig,
}

/// One transport binding of a topic.
pub(crate) struct TopicSubscription {
    spec: ChannelSpec,
    state: Mutex<TopicState>,
    channel: Mutex<Option<ChannelId>>,
    shutdown: watch::Sender<bool>,
    shared: Arc<Shared>,
}

impl TopicSubscription {
    /// Create a binding and spawn its task.
    pub(crate) fn start(
        spec: ChannelSpec,
        dispatcher: Arc<Dispatcher>,
        shared: Arc<Shared>,
        runtime: &Handle,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let subscription = Arc::new(Self {
            spec,
            state: Mutex::new(TopicState::Connecting),
            channel: Mutex::new(None),
            shutdown,
            shared,
        });
        let task = runtime.spawn(subscription.clone().run(dispatcher, shutdown_rx));
        (subscription, task)
    }

    pub(crate) fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    pub(crate) fn state(&self) -> TopicState {
        *self.state.lock()
    }

    pub(crate) fn has_open_channel(&self) -> bool {
        self.channel.lock().is_some()
    }

    fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Tear the binding down and tell observers the topic is closed.
    pub(crate) fn close(&self) {
        self.shut_down(true);
    }

    /// Tear the binding down because a fresh one replaces it.
    pub(crate) fn retire(&self) {
        self.shut_down(false);
    }

    fn shut_down(&self, notify: bool) {
        let previous = {
            let mut state = self.state.lock();
            if *state == TopicState::Closed {
                return;
            }
            std::mem::replace(&mut *state, TopicState::Closed)
        };

        self.release_channel();
        let _ = self.shutdown.send(true);

        debug!(topic = %self.spec.topic, previous = ?previous, "topic subscription closed");
        if notify && previous != TopicState::Failed {
            self.shared
                .observers
                .notify(&self.spec.topic, &TopicStatus::Closed);
        }
    }

    /// Move to `next` unless the binding is already terminal.
    fn set_state(&self, next: TopicState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    fn attach_channel(&self, id: ChannelId) -> bool {
        let mut channel = self.channel.lock();
        if self.is_closed() {
            self.shared.transport.close(id);
            return false;
        }
        *channel = Some(id);
        self.shared.metrics.record_transport_opened();
        true
    }

    fn release_channel(&self) {
        if let Some(id) = self.channel.lock().take() {
            self.shared.transport.close(id);
            self.shared.metrics.record_transport_closed();
            trace!(topic = %self.spec.topic, channel_id = id, "channel released");
        }
    }

    fn notify(&self, status: TopicStatus) {
        self.shared.observers.notify(&self.spec.topic, &status);
    }

    fn report_error(&self, error: TopicError) {
        if self.set_state(TopicState::Erroring) {
            warn!(topic = %self.spec.topic, error = %error, "topic error");
            self.notify(TopicStatus::Error(error));
        }
    }

    async fn run(
        self: Arc<Self>,
        dispatcher: Arc<Dispatcher>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut failures: u32 = 0;
        let mut last_commit: Option<u64> = None;

        loop {
            let Some(mut messages) = self.connect(&mut failures, &mut shutdown).await else {
                return;
            };

            loop {
                let message = tokio::select! {
                    biased;
                    _ = shutdown.changed() => return,
                    message = messages.recv() => message,
                };

                match message {
                    Some(TransportMessage::Change(raw)) => {
                        self.deliver(raw, &dispatcher, &mut last_commit);
                    }
                    Some(TransportMessage::Status(status)) => {
                        if self.on_status(status, &mut failures) {
                            break;
                        }
                    }
                    None => {
                        if self.is_closed() {
                            return;
                        }
                        self.report_error(TopicError::ConnectionLost);
                        failures += 1;
                        break;
                    }
                }
            }
        }
    }

    /// Open a channel, backing off after failures.
    ///
    /// Returns `None` when the binding was closed or gave up.
    async fn connect(
        &self,
        failures: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<mpsc::Receiver<TransportMessage>> {
        let policy = &self.shared.config.reconnect;

        loop {
            if self.is_closed() {
                return None;
            }

            if *failures > 0 {
                if !policy.allows(*failures) {
                    self.give_up(*failures - 1);
                    return None;
                }

                let delay = policy.delay(*failures);
                self.shared.metrics.record_reconnect_attempt();
                debug!(
                    topic = %self.spec.topic,
                    attempt = *failures,
                    delay_ms = delay.as_millis() as u64,
                    "reconnecting"
                );

                tokio::select! {
                    biased;
                    _ = shutdown.changed() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.release_channel();
            if !self.set_state(TopicState::Connecting) {
                return None;
            }
            self.notify(TopicStatus::Connecting);

            // Opens are not timed out; shutdown cancels a pending one.
            let opened = tokio::select! {
                biased;
                _ = shutdown.changed() => return None,
                opened = self.shared.transport.open(&self.spec) => opened,
            };

            match opened {
                Ok(opened) => {
                    if !self.attach_channel(opened.id) {
                        return None;
                    }
                    debug!(
                        topic = %self.spec.topic,
                        collection = %self.spec.collection,
                        channel_id = opened.id,
                        "channel opened"
                    );
                    return Some(opened.messages);
                }
                Err(e) => {
                    self.shared.metrics.record_open_failure();
                    self.report_error(TopicError::OpenFailed(e.to_string()));
                    *failures += 1;
                }
            }
        }
    }

    /// Handle a status transition. Returns `true` if the channel must be reopened.
    fn on_status(&self, status: TransportStatus, failures: &mut u32) -> bool {
        let self_heals = self.shared.config.reconnect.transport_self_heals;

        match status {
            TransportStatus::Connecting => {
                if self.set_state(TopicState::Connecting) {
                    self.notify(TopicStatus::Connecting);
                }
                false
            }
            TransportStatus::Subscribed => {
                if self.set_state(TopicState::Subscribed) {
                    *failures = 0;
                    debug!(topic = %self.spec.topic, "topic subscribed");
                    self.notify(TopicStatus::Subscribed);
                }
                false
            }
            TransportStatus::ChannelError(message) => {
                self.shared.metrics.record_channel_error();
                self.report_error(TopicError::Channel(message));
                self.escalate(self_heals, failures)
            }
            TransportStatus::TimedOut => {
                self.shared.metrics.record_channel_error();
                self.report_error(TopicError::TimedOut);
                self.escalate(self_heals, failures)
            }
            TransportStatus::Closed => {
                self.report_error(TopicError::ConnectionLost);
                *failures += 1;
                true
            }
        }
    }

    fn escalate(&self, self_heals: bool, failures: &mut u32) -> bool {
        if self_heals {
            return false;
        }
        *failures += 1;
        true
    }

    fn give_up(&self, attempts: u32) {
        if !self.set_state(TopicState::Failed) {
            return;
        }
        self.release_channel();
        warn!(topic = %self.spec.topic, attempts, "giving up on topic");
        self.notify(TopicStatus::Error(TopicError::RetriesExhausted { attempts }));
        self.notify(TopicStatus::Closed);
    }

    fn deliver(&self, raw: RawChange, dispatcher: &Dispatcher, last_commit: &mut Option<u64>) {
        let change = match normalize(raw) {
            Ok(change) => change,
            Err(e) => {
                self.shared.metrics.record_normalize_failure();
                warn!(topic = %self.spec.topic, error = %e, "dropping malformed change");
                return;
            }
        };

        if let Some(commit) = change.commit_sequence {
            if let Some(last) = *last_commit {
                if commit <= last {
                    self.shared.metrics.record_duplicate();
                    debug!(topic = %self.spec.topic, commit, last, "dropping redelivered change");
                    return;
                }
            }
            *last_commit = Some(commit);
        }

        if self.is_closed() {
            self.shared.metrics.record_dropped_after_close();
            return;
        }

        dispatcher.dispatch(change);
    }
}

impl std::fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("spec", &self.spec)
            .field("state", &self.state())
            .field("channel", &*self.channel.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(TopicState::Closed.is_terminal());
        assert!(TopicState::Failed.is_terminal());
        assert!(!TopicState::Erroring.is_terminal());

        assert!(TopicState::Erroring.is_stale());
        assert!(TopicState::Failed.is_stale());
        assert!(!TopicState::Subscribed.is_stale());
        assert!(!TopicState::Connecting.is_stale());
    }
}
