//! Ready-made consumers of change events and topic status.
//!
//! - [`UnreadBadge`] keeps an unread-notification count current.
//! - [`CacheInvalidator`] marks cached rows dirty as changes arrive.
//! - [`StalenessTracker`] records which topics are currently showing stale data.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use relaycast_proto::{ChangeKind, Row, TopicKey, Value};

use crate::dispatcher::CallbackResult;
use crate::error::TopicError;
use crate::event::ChangeEvent;
use crate::observer::{StatusObserver, TopicStatus};

/// Default column marking a notification as read.
pub const DEFAULT_READ_COLUMN: &str = "is_read";

/// Default primary key column.
pub const DEFAULT_KEY_COLUMN: &str = "id";

/// Unread-notification counter.
///
/// Cloning yields another handle to the same counter, so one clone can be
/// moved into a subscription callback while another is read by the UI.
#[derive(Debug, Clone)]
pub struct UnreadBadge {
    read_column: Arc<str>,
    unread: Arc<AtomicU64>,
}

impl UnreadBadge {
    /// Create a badge reading the `is_read` column.
    pub fn new() -> Self {
        Self::with_read_column(DEFAULT_READ_COLUMN)
    }

    /// Create a badge reading a custom column.
    pub fn with_read_column(column: impl Into<String>) -> Self {
        Self {
            read_column: Arc::from(column.into()),
            unread: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seed the count, e.g. from an initial query.
    pub fn set(&self, count: u64) {
        self.unread.store(count, Ordering::SeqCst);
    }

    /// Current unread count.
    pub fn count(&self) -> u64 {
        self.unread.load(Ordering::SeqCst)
    }

    /// Apply a change to the count.
    ///
    /// Rows without the read column are ignored. A read column holding
    /// anything but a boolean is reported as a callback failure.
    pub fn apply(&self, event: &ChangeEvent) -> CallbackResult {
        let new = self.unread_flag(event.new_row())?;
        let old = self.unread_flag(event.old_row())?;

        match (event.kind(), old, new) {
            (ChangeKind::Insert, _, Some(true)) => self.increment(),
            (ChangeKind::Update, Some(true), Some(false)) => self.decrement(),
            (ChangeKind::Update, Some(false), Some(true)) => self.increment(),
            (ChangeKind::Delete, Some(true), _) => self.decrement(),
            _ => {}
        }
        Ok(())
    }

    /// Callback that applies every change to this badge.
    pub fn callback(&self) -> impl Fn(&ChangeEvent) -> CallbackResult + Send + Sync + 'static {
        let badge = self.clone();
        move |event| badge.apply(event)
    }

    fn unread_flag(&self, row: Option<&Row>) -> Result<Option<bool>, String> {
        let Some(value) = row.and_then(|row| row.get(&self.read_column)) else {
            return Ok(None);
        };
        match value {
            Value::Bool(read) => Ok(Some(!read)),
            Value::Null => Ok(None),
            other => Err(format!(
                "column {} is not a boolean: {}",
                self.read_column, other
            )),
        }
    }

    fn increment(&self) {
        self.unread.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        let _ = self
            .unread
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl Default for UnreadBadge {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct CacheEntry {
    generation: u64,
    dirty: BTreeSet<String>,
}

/// Per-topic cache invalidation.
///
/// Every change bumps its topic's generation; the key of every affected row
/// is queued until [`take_dirty`](Self::take_dirty) drains it.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    key_column: Arc<str>,
    entries: Arc<Mutex<HashMap<TopicKey, CacheEntry>>>,
}

impl CacheInvalidator {
    pub fn new() -> Self {
        Self::with_key_column(DEFAULT_KEY_COLUMN)
    }

    pub fn with_key_column(column: impl Into<String>) -> Self {
        Self {
            key_column: Arc::from(column.into()),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a change.
    pub fn apply(&self, event: &ChangeEvent) -> CallbackResult {
        let keys: BTreeSet<String> = [event.new_row(), event.old_row()]
            .into_iter()
            .flatten()
            .filter_map(|row| row.get(&self.key_column))
            .filter(|value| !value.is_null())
            .map(|value| value.to_string())
            .collect();

        let mut entries = self.entries.lock();
        let entry = entries.entry(event.topic().clone()).or_default();
        entry.generation += 1;
        entry.dirty.extend(keys);
        Ok(())
    }

    /// Callback that records every change in this invalidator.
    pub fn callback(&self) -> impl Fn(&ChangeEvent) -> CallbackResult + Send + Sync + 'static {
        let invalidator = self.clone();
        move |event| invalidator.apply(event)
    }

    /// Number of changes seen on a topic.
    pub fn generation(&self, topic: &str) -> u64 {
        self.entries
            .lock()
            .get(topic)
            .map(|entry| entry.generation)
            .unwrap_or(0)
    }

    /// Drain the keys of rows changed on a topic since the last call.
    pub fn take_dirty(&self, topic: &str) -> BTreeSet<String> {
        self.entries
            .lock()
            .get_mut(topic)
            .map(|entry| std::mem::take(&mut entry.dirty))
            .unwrap_or_default()
    }
}

impl Default for CacheInvalidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer tracking topics whose data may be stale.
///
/// A topic becomes stale on any error status and fresh again once the
/// transport acknowledges it. Teardown forgets the topic, unless it was
/// closed because reconnect attempts ran out.
#[derive(Debug, Default)]
pub struct StalenessTracker {
    stale: Mutex<BTreeMap<TopicKey, TopicError>>,
}

impl StalenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a topic is currently stale.
    pub fn is_stale(&self, topic: &str) -> bool {
        self.stale.lock().contains_key(topic)
    }

    /// Last error seen on a stale topic.
    pub fn last_error(&self, topic: &str) -> Option<TopicError> {
        self.stale.lock().get(topic).cloned()
    }

    /// Every stale topic, sorted.
    pub fn stale_topics(&self) -> Vec<TopicKey> {
        self.stale.lock().keys().cloned().collect()
    }
}

impl StatusObserver for StalenessTracker {
    fn on_status(&self, topic: &TopicKey, status: &TopicStatus) {
        let mut stale = self.stale.lock();
        match status {
            TopicStatus::Error(error) => {
                stale.insert(topic.clone(), error.clone());
            }
            TopicStatus::Subscribed => {
                stale.remove(topic);
            }
            TopicStatus::Closed => {
                if !matches!(stale.get(topic), Some(TopicError::RetriesExhausted { .. })) {
                    stale.remove(topic);
                }
            }
            TopicStatus::Connecting => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Change;

    fn event(topic: &str, kind: ChangeKind, new: Option<Row>, old: Option<Row>) -> ChangeEvent {
        ChangeEvent::new(
            TopicKey::from(topic),
            1,
            Change {
                kind,
                new,
                old,
                commit_sequence: None,
                commit_timestamp: None,
            },
        )
    }

    fn notification(id: &str, read: bool) -> Row {
        Row::new().with("id", id).with("is_read", read)
    }

    #[test]
    fn test_unread_badge() {
        let badge = UnreadBadge::new();
        let callback = badge.callback();
        let topic = "notifications_user42";

        callback(&event(topic, ChangeKind::Insert, Some(notification("n1", false)), None)).unwrap();
        callback(&event(topic, ChangeKind::Insert, Some(notification("n2", false)), None)).unwrap();
        callback(&event(topic, ChangeKind::Insert, Some(notification("n3", true)), None)).unwrap();
        assert_eq!(badge.count(), 2);

        callback(&event(
            topic,
            ChangeKind::Update,
            Some(notification("n1", true)),
            Some(notification("n1", false)),
        ))
        .unwrap();
        assert_eq!(badge.count(), 1);

        // Old row unknown: no change.
        callback(&event(
            topic,
            ChangeKind::Update,
            Some(notification("n2", true)),
            Some(Row::new()),
        ))
        .unwrap();
        assert_eq!(badge.count(), 1);

        callback(&event(topic, ChangeKind::Delete, None, Some(notification("n2", false)))).unwrap();
        callback(&event(topic, ChangeKind::Delete, None, Some(notification("n2", false)))).unwrap();
        assert_eq!(badge.count(), 0);
    }

    #[test]
    fn test_unread_badge_rejects_non_boolean() {
        let badge = UnreadBadge::new();
        let row = Row::new().with("id", "n1").with("is_read", "no");
        assert!(badge.apply(&event("n", ChangeKind::Insert, Some(row), None)).is_err());
        assert_eq!(badge.count(), 0);
    }

    #[test]
    fn test_cache_invalidator() {
        let cache = CacheInvalidator::new();
        let banner = |id: i64| Row::new().with("id", id).with("title", "Spring sale");

        cache.apply(&event("banners", ChangeKind::Insert, Some(banner(1)), None)).unwrap();
        cache
            .apply(&event("banners", ChangeKind::Update, Some(banner(2)), Some(banner(2))))
            .unwrap();
        cache.apply(&event("banners", ChangeKind::Delete, None, Some(banner(3)))).unwrap();

        assert_eq!(cache.generation("banners"), 3);
        assert_eq!(cache.generation("users"), 0);

        let dirty: Vec<_> = cache.take_dirty("banners").into_iter().collect();
        assert_eq!(dirty, vec!["1", "2", "3"]);
        assert!(cache.take_dirty("banners").is_empty());
    }

    #[test]
    fn test_staleness_tracker() {
        let tracker = StalenessTracker::new();
        let banners = TopicKey::from("banners");
        let users = TopicKey::from("users");

        tracker.on_status(&banners, &TopicStatus::Error(TopicError::TimedOut));
        tracker.on_status(&users, &TopicStatus::Error(TopicError::ConnectionLost));
        assert_eq!(tracker.stale_topics(), vec![banners.clone(), users.clone()]);

        tracker.on_status(&banners, &TopicStatus::Subscribed);
        assert!(!tracker.is_stale("banners"));

        tracker.on_status(&users, &TopicStatus::Closed);
        assert!(!tracker.is_stale("users"));

        let exhausted = TopicError::RetriesExhausted { attempts: 3 };
        tracker.on_status(&users, &TopicStatus::Error(exhausted.clone()));
        tracker.on_status(&users, &TopicStatus::Closed);
        assert_eq!(tracker.last_error("users"), Some(exhausted));
    }
}
