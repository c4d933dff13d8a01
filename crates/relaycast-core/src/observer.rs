//! Topic status observers.
//!
//! Observers receive every lifecycle transition of every topic. An error
//! status is reported explicitly, so a consumer can tell "no events yet"
//! apart from "the stream is broken" and render a stale-data indicator.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use relaycast_proto::TopicKey;

use crate::error::TopicError;

/// A lifecycle transition of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicStatus {
    /// A transport channel is being opened.
    Connecting,
    /// The transport acknowledged the subscription.
    Subscribed,
    /// The transport reported a failure. The topic stays registered.
    Error(TopicError),
    /// The topic was torn down or gave up reconnecting.
    Closed,
}

impl TopicStatus {
    /// Whether this status is an error signal.
    pub fn is_error(&self) -> bool {
        matches!(self, TopicStatus::Error(_))
    }
}

/// Receiver of topic status transitions.
pub trait StatusObserver: Send + Sync {
    /// Called on every transition of every topic.
    fn on_status(&self, topic: &TopicKey, status: &TopicStatus);
}

/// Adapter that wraps a closure into a [`StatusObserver`].
pub struct FnObserver<F>(pub F);

impl<F> StatusObserver for FnObserver<F>
where
    F: Fn(&TopicKey, &TopicStatus) + Send + Sync,
{
    fn on_status(&self, topic: &TopicKey, status: &TopicStatus) {
        (self.0)(topic, status)
    }
}

/// Observer list shared by all topics of a registry.
#[derive(Default)]
pub(crate) struct Observers {
    list: RwLock<Vec<Arc<dyn StatusObserver>>>,
}

impl Observers {
    pub(crate) fn add(&self, observer: Arc<dyn StatusObserver>) {
        self.list.write().push(observer);
    }

    pub(crate) fn notify(&self, topic: &TopicKey, status: &TopicStatus) {
        let observers: Vec<_> = self.list.read().clone();
        for observer in observers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_status(topic, status)
            }));
            if result.is_err() {
                warn!(topic = %topic, status = ?status, "status observer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_notify_all_observers() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        observers.add(Arc::new(FnObserver(move |topic: &TopicKey, status: &TopicStatus| {
            sink.lock().push((topic.clone(), status.clone()));
        })));
        observers.add(Arc::new(FnObserver(|_: &TopicKey, _: &TopicStatus| {
            panic!("bad observer")
        })));
        let sink = seen.clone();
        observers.add(Arc::new(FnObserver(move |topic: &TopicKey, status: &TopicStatus| {
            sink.lock().push((topic.clone(), status.clone()));
        })));

        let error = TopicStatus::Error(TopicError::TimedOut);
        observers.notify(&TopicKey::from("banners"), &error);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, status)| status.is_error()));
    }
}
