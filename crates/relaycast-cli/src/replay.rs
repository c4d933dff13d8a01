//! Change log replay.
//!
//! Every configured topic is subscribed on a fresh registry backed by the
//! in-memory data service, the log is published change by change, and
//! deliveries are counted per topic.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use relaycast_core::{
    ChangeEvent, MemoryTransport, MetricsSnapshot, Registry, SharedMetrics, StalenessTracker,
    SubscriptionHandle, TopicState,
};
use relaycast_proto::{RawChange, TopicKey};

use crate::config::ReplayConfig;
use crate::error::Error;

/// One line of a change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Collection the change belongs to.
    pub collection: String,
    /// The change as the data service reports it.
    pub change: RawChange,
}

/// Read a JSON-lines change log. Blank lines and `#` comments are skipped.
pub fn parse_log(reader: impl BufRead) -> Result<Vec<LogEntry>, Error> {
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = serde_json::from_str(line).map_err(|e| Error::Log {
            line: index + 1,
            source: e.into(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Per-topic outcome of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicReport {
    pub collection: String,
    pub filter: Option<String>,
    pub events: u64,
    pub last_sequence: Option<u64>,
    pub stale: bool,
}

/// Outcome of a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    /// Log entries published.
    pub entries: usize,
    /// Entries that matched no open channel.
    pub unrouted: usize,
    pub topics: BTreeMap<TopicKey, TopicReport>,
    pub metrics: MetricsSnapshot,
}

#[derive(Default)]
struct Delivered {
    events: u64,
    last_sequence: Option<u64>,
}

/// Replay `entries` through a registry configured by `config`.
pub async fn replay(
    config: &ReplayConfig,
    entries: &[LogEntry],
    metrics: SharedMetrics,
) -> Result<ReplayReport, Error> {
    let transport = MemoryTransport::with_buffer_size(config.buffer_size);
    let registry = Registry::with_metrics(
        Arc::new(transport.clone()),
        config.registry.clone(),
        metrics.clone(),
    );
    let tracker = Arc::new(StalenessTracker::new());
    registry.add_observer(tracker.clone());

    let delivered: Arc<Mutex<BTreeMap<TopicKey, Delivered>>> = Arc::default();
    let mut handles: Vec<SubscriptionHandle> = Vec::with_capacity(config.topics.len());

    for topic in &config.topics {
        let sink = delivered.clone();
        let handle = registry.subscribe(
            topic.key.clone(),
            topic.collection.clone(),
            topic.filter.clone(),
            move |event: &ChangeEvent| {
                info!(
                    topic = %event.topic(),
                    sequence = event.sequence(),
                    kind = %event.kind(),
                    "change delivered"
                );
                let mut delivered = sink.lock();
                let entry = delivered.entry(event.topic().clone()).or_default();
                entry.events += 1;
                entry.last_sequence = Some(event.sequence());
                Ok(())
            },
        )?;
        handles.push(handle);
    }

    if !wait_for_subscribed(&registry, config.connect_timeout).await {
        warn!(
            timeout_ms = config.connect_timeout.as_millis() as u64,
            "not every topic was acknowledged, replaying anyway"
        );
    }

    let mut unrouted = 0;
    for entry in entries {
        let channels = transport.emit(&entry.collection, entry.change.clone()).await;
        if channels == 0 {
            unrouted += 1;
            debug!(collection = %entry.collection, "change matched no topic");
        }
    }

    tokio::time::sleep(config.drain).await;

    let mut topics = BTreeMap::new();
    {
        let delivered = delivered.lock();
        for topic in &config.topics {
            let seen = delivered.get(&topic.key);
            topics.insert(
                topic.key.clone(),
                TopicReport {
                    collection: topic.collection.clone(),
                    filter: topic.filter.as_ref().map(|f| f.to_string()),
                    events: seen.map(|d| d.events).unwrap_or(0),
                    last_sequence: seen.and_then(|d| d.last_sequence),
                    stale: tracker.is_stale(topic.key.as_str()),
                },
            );
        }
    }

    registry.cleanup_all().await;
    drop(handles);

    Ok(ReplayReport {
        entries: entries.len(),
        unrouted,
        topics,
        metrics: metrics.snapshot(),
    })
}

async fn wait_for_subscribed(registry: &Registry, timeout: Duration) -> bool {
    let all_subscribed = || {
        registry
            .topic_keys()
            .iter()
            .all(|key| registry.topic_state(key.as_str()) == Some(TopicState::Subscribed))
    };

    tokio::time::timeout(timeout, async {
        while !all_subscribed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicArg;
    use relaycast_core::new_shared_metrics;

    const LOG: &str = r#"
# seeded notifications
{"collection": "notifications", "change": {"type": "INSERT", "record": {"id": "n1", "user_id": "user42", "is_read": false}}}
{"collection": "notifications", "change": {"type": "INSERT", "record": {"id": "n2", "user_id": "user7", "is_read": false}}}
{"collection": "app_config", "change": {"eventType": "UPDATE", "new": {"key": "theme", "value": "dark"}, "old": {"key": "theme", "value": "light"}}}
{"collection": "banners", "change": {"type": "DELETE", "old_record": {"id": 3}}}
"#;

    #[test]
    fn test_parse_log() {
        let entries = parse_log(LOG.as_bytes()).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].collection, "notifications");
        assert_eq!(entries[2].change.operation, "UPDATE");
        assert!(entries[2].change.old_record.is_some());
    }

    #[test]
    fn test_parse_log_reports_line() {
        let log = "{\"collection\": \"a\", \"change\": {\"type\": \"INSERT\"}}\nnot json\n";
        match parse_log(log.as_bytes()) {
            Err(Error::Log { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_counts_deliveries() {
        let notifications: TopicArg = "notifications_user42=notifications:user_id=user42"
            .parse()
            .unwrap();
        let app_config: TopicArg = "app_config_changes=app_config".parse().unwrap();
        let config = ReplayConfig::new()
            .with_topic(notifications)
            .with_topic(app_config)
            .with_drain(Duration::from_millis(20));
        let entries = parse_log(LOG.as_bytes()).unwrap();

        let report = replay(&config, &entries, new_shared_metrics()).await.unwrap();

        assert_eq!(report.entries, 4);
        assert_eq!(report.unrouted, 2);
        let notifications = &report.topics[&TopicKey::from("notifications_user42")];
        assert_eq!(notifications.events, 1);
        assert_eq!(notifications.filter.as_deref(), Some("user_id=eq.user42"));
        assert_eq!(report.topics[&TopicKey::from("app_config_changes")].last_sequence, Some(1));
        assert_eq!(report.metrics.events_dispatched, 2);
        assert_eq!(report.metrics.transports_opened, report.metrics.transports_closed);
    }
}
