//! Per-topic event delivery.
//!
//! A [`Dispatcher`] holds the ordered callback set of one topic. Each
//! dispatched change is stamped with the next sequence number and handed to
//! every active callback in registration order. A failing or panicking
//! callback is logged and skipped; it never affects other callbacks or the
//! next event.
//!
//! Delivery snapshots the callback list before invoking anything, so a
//! callback may unsubscribe itself (or others) from inside its handler.
//! Each slot carries a reentrant gate held for the whole invocation. The
//! active flag is checked under the gate, and removal flips the flag and
//! then passes through the gate, so once removal returns the callback is
//! neither running on another thread nor invoked again. Removal from inside
//! the callback's own invocation re-enters the gate instead of waiting.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{trace, warn};

use relaycast_proto::TopicKey;

use crate::event::ChangeEvent;
use crate::metrics::SharedMetrics;
use crate::normalizer::Change;

/// Error type consumer callbacks may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Result type of consumer callbacks.
pub type CallbackResult = Result<(), CallbackError>;

/// Identifier of one registered callback, unique within a registry.
pub type CallbackId = u64;

type BoxedCallback = Box<dyn Fn(&ChangeEvent) -> CallbackResult + Send + Sync>;

pub(crate) struct CallbackSlot {
    id: CallbackId,
    active: AtomicBool,
    gate: ReentrantMutex<()>,
    callback: BoxedCallback,
}

impl CallbackSlot {
    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Wait for an invocation running on another thread to finish.
    pub(crate) fn quiesce(&self) {
        drop(self.gate.lock());
    }
}

/// Outcome of dispatching one change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sequence number assigned to the event, if it was delivered.
    pub sequence: Option<u64>,
    /// Callbacks that completed successfully.
    pub delivered: usize,
    /// Callbacks that returned an error or panicked.
    pub failed: usize,
}

/// Ordered callback set and sequencer for one topic.
pub struct Dispatcher {
    topic: TopicKey,
    callbacks: Mutex<Vec<Arc<CallbackSlot>>>,
    next_sequence: AtomicU64,
    closed: AtomicBool,
    catch_panics: bool,
    metrics: SharedMetrics,
}

impl Dispatcher {
    /// Create an empty dispatcher for a topic.
    pub fn new(topic: TopicKey, metrics: SharedMetrics, catch_panics: bool) -> Self {
        Self {
            topic,
            callbacks: Mutex::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            catch_panics,
            metrics,
        }
    }

    /// Topic this dispatcher delivers for.
    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Append a callback to the delivery order.
    pub fn register<F>(&self, id: CallbackId, callback: F)
    where
        F: Fn(&ChangeEvent) -> CallbackResult + Send + Sync + 'static,
    {
        let slot = Arc::new(CallbackSlot {
            id,
            active: AtomicBool::new(true),
            gate: ReentrantMutex::new(()),
            callback: Box::new(callback),
        });
        self.callbacks.lock().push(slot);
    }

    /// Remove a callback. Returns `false` if it was not registered.
    ///
    /// Once this returns, the callback is not running on another thread and
    /// is never invoked again.
    pub fn remove(&self, id: CallbackId) -> bool {
        match self.detach(id) {
            Some(slot) => {
                slot.quiesce();
                true
            }
            None => false,
        }
    }

    /// Take a callback out of the delivery order without waiting for an
    /// in-flight invocation. Callers must [`quiesce`](CallbackSlot::quiesce)
    /// the slot once they hold no locks a callback could need.
    pub(crate) fn detach(&self, id: CallbackId) -> Option<Arc<CallbackSlot>> {
        let mut callbacks = self.callbacks.lock();
        let index = callbacks.iter().position(|slot| slot.id == id)?;
        let slot = callbacks.remove(index);
        slot.deactivate();
        Some(slot)
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }

    /// Stop all delivery and drop every callback.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = std::mem::take(&mut *self.callbacks.lock());
        for slot in &drained {
            slot.deactivate();
        }
        for slot in &drained {
            slot.quiesce();
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver a change to every registered callback in registration order.
    pub fn dispatch(&self, change: Change) -> DispatchReport {
        if self.is_closed() {
            self.metrics.record_dropped_after_close();
            trace!(topic = %self.topic, "dropping event for closed topic");
            return DispatchReport::default();
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let event = ChangeEvent::new(self.topic.clone(), sequence, change);
        let slots: Vec<Arc<CallbackSlot>> = self.callbacks.lock().clone();

        let mut report = DispatchReport {
            sequence: Some(sequence),
            ..DispatchReport::default()
        };

        for slot in slots {
            let _gate = slot.gate.lock();
            if !slot.active.load(Ordering::SeqCst) {
                continue;
            }
            match self.invoke(&slot, &event) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        topic = %self.topic,
                        sequence,
                        callback_id = slot.id,
                        error = %error,
                        "callback failed"
                    );
                }
            }
        }

        self.metrics
            .record_dispatch((report.delivered + report.failed) as u64, report.failed as u64);
        trace!(
            topic = %self.topic,
            sequence,
            kind = %event.kind(),
            delivered = report.delivered,
            failed = report.failed,
            "dispatched event"
        );

        report
    }

    fn invoke(&self, slot: &CallbackSlot, event: &ChangeEvent) -> CallbackResult {
        if !self.catch_panics {
            return (slot.callback)(event);
        }

        match std::panic::catch_unwind(AssertUnwindSafe(|| (slot.callback)(event))) {
            Ok(result) => result,
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("callback panicked: {}", s)
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("callback panicked: {}", s)
                } else {
                    "callback panicked".to_string()
                };
                Err(message.into())
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("topic", &self.topic)
            .field("callbacks", &self.len())
            .field("next_sequence", &self.next_sequence.load(Ordering::SeqCst))
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::new_shared_metrics;
    use relaycast_proto::{ChangeKind, Row};

    fn insert(id: &str) -> Change {
        Change {
            kind: ChangeKind::Insert,
            new: Some(Row::new().with("id", id)),
            old: None,
            commit_sequence: None,
            commit_timestamp: None,
        }
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
    ) -> impl Fn(&ChangeEvent) -> CallbackResult + Send + Sync + 'static {
        let log = log.clone();
        move |event| {
            log.lock().push(format!("{}:{}", name, event.sequence()));
            Ok(())
        }
    }

    #[test]
    fn test_registration_order_and_sequence() {
        let dispatcher = Dispatcher::new(TopicKey::from("t"), new_shared_metrics(), true);
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(1, recorder(&log, "a"));
        dispatcher.register(2, recorder(&log, "b"));

        let first = dispatcher.dispatch(insert("1"));
        let second = dispatcher.dispatch(insert("2"));

        assert_eq!(first.sequence, Some(1));
        assert_eq!(second.sequence, Some(2));
        assert_eq!(*log.lock(), vec!["a:1", "b:1", "a:2", "b:2"]);
    }

    #[test]
    fn test_failing_callback_is_isolated() {
        let metrics = new_shared_metrics();
        let dispatcher = Dispatcher::new(TopicKey::from("t"), metrics.clone(), true);
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register(1, |_: &ChangeEvent| Err("boom".into()));
        dispatcher.register(2, |_: &ChangeEvent| -> CallbackResult { panic!("kaboom") });
        dispatcher.register(3, recorder(&log, "ok"));

        let report = dispatcher.dispatch(insert("1"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);

        // The next event is unaffected.
        let report = dispatcher.dispatch(insert("2"));
        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock(), vec!["ok:1", "ok:2"]);
        assert_eq!(metrics.snapshot().callback_failures, 4);
    }

    #[test]
    fn test_removed_callback_not_invoked() {
        let dispatcher = Dispatcher::new(TopicKey::from("t"), new_shared_metrics(), true);
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(1, recorder(&log, "a"));
        dispatcher.register(2, recorder(&log, "b"));

        assert!(dispatcher.remove(1));
        assert!(!dispatcher.remove(1));
        dispatcher.dispatch(insert("1"));

        assert_eq!(*log.lock(), vec!["b:1"]);
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn test_callback_removing_later_callback() {
        let dispatcher = Arc::new(Dispatcher::new(TopicKey::from("t"), new_shared_metrics(), true));
        let log = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&dispatcher);
        dispatcher.register(1, move |_: &ChangeEvent| {
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.remove(2);
            }
            Ok(())
        });
        dispatcher.register(2, recorder(&log, "b"));

        dispatcher.dispatch(insert("1"));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_remove_waits_for_running_callback() {
        let dispatcher = Arc::new(Dispatcher::new(TopicKey::from("t"), new_shared_metrics(), true));
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let done = finished.clone();
        dispatcher.register(1, move |_: &ChangeEvent| {
            let _ = entered_tx.send(());
            std::thread::sleep(std::time::Duration::from_millis(50));
            done.store(true, Ordering::SeqCst);
            Ok(())
        });

        let worker = {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || dispatcher.dispatch(insert("1")))
        };
        entered_rx.recv().unwrap();

        assert!(dispatcher.remove(1));
        assert!(finished.load(Ordering::SeqCst));

        assert_eq!(worker.join().unwrap().delivered, 1);
        assert_eq!(dispatcher.dispatch(insert("2")).delivered, 0);
    }

    #[test]
    fn test_close_from_inside_callback() {
        let dispatcher = Arc::new(Dispatcher::new(TopicKey::from("t"), new_shared_metrics(), true));
        let log = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&dispatcher);
        dispatcher.register(1, move |_: &ChangeEvent| {
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.close();
            }
            Ok(())
        });
        dispatcher.register(2, recorder(&log, "b"));

        let report = dispatcher.dispatch(insert("1"));
        assert_eq!(report.delivered, 1);
        assert!(log.lock().is_empty());
        assert!(dispatcher.is_closed());
    }

    #[test]
    fn test_closed_dispatcher_drops_events() {
        let metrics = new_shared_metrics();
        let dispatcher = Dispatcher::new(TopicKey::from("t"), metrics.clone(), true);
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(1, recorder(&log, "a"));

        dispatcher.close();
        let report = dispatcher.dispatch(insert("1"));

        assert_eq!(report.sequence, None);
        assert!(log.lock().is_empty());
        assert!(dispatcher.is_empty());
        assert_eq!(metrics.snapshot().dropped_after_close, 1);
    }
}
