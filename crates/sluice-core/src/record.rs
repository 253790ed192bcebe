// ABOUTME: Value types exchanged with recorders: stored events, notifications, and tracking watermarks.
// ABOUTME: Also defines the record-kind selector and the query shapes for aggregate and feed reads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One serialized domain event (or snapshot) of an originator.
///
/// The recorder never interprets `topic` or `state`; the application name
/// is carried by the recorder that writes the value, not by the value itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub originator_id: Uuid,
    pub originator_version: i64,
    pub topic: String,
    pub state: Vec<u8>,
}

impl StoredEvent {
    pub fn new(
        originator_id: Uuid,
        originator_version: i64,
        topic: impl Into<String>,
        state: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            originator_id,
            originator_version,
            topic: topic.into(),
            state: state.into(),
        }
    }
}

/// A stored event as seen through an application's notification feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub originator_id: Uuid,
    pub originator_version: i64,
    pub topic: String,
    pub state: Vec<u8>,
}

impl Notification {
    /// Drop the feed position, keeping the event itself.
    pub fn into_stored_event(self) -> StoredEvent {
        StoredEvent {
            originator_id: self.originator_id,
            originator_version: self.originator_version,
            topic: self.topic,
            state: self.state,
        }
    }
}

/// Watermark written alongside a batch of events: the upstream application
/// and the notification of theirs that produced the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracking {
    pub application_name: String,
    pub notification_id: i64,
}

impl Tracking {
    pub fn new(application_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            application_name: application_name.into(),
            notification_id,
        }
    }
}

/// Which table an aggregate recorder writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Events,
    Snapshots,
}

impl RecordKind {
    pub const fn table(self) -> &'static str {
        match self {
            Self::Events => "stored_events",
            Self::Snapshots => "snapshots",
        }
    }

    /// Name of the auto-assigned primary key column.
    pub const fn id_column(self) -> &'static str {
        match self {
            Self::Events => "id",
            Self::Snapshots => "uid",
        }
    }

    /// Name of the unique constraint on `(application_name, originator_id, originator_version)`.
    pub const fn version_constraint(self) -> &'static str {
        match self {
            Self::Events => "stored_events_version_key",
            Self::Snapshots => "snapshots_version_key",
        }
    }
}

/// Bounds for reading one originator's events.
///
/// `gt` is exclusive, `lte` inclusive. Results are ascending by version
/// unless `desc` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub gt: Option<i64>,
    pub lte: Option<i64>,
    pub desc: bool,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gt(mut self, version: i64) -> Self {
        self.gt = Some(version);
        self
    }

    pub fn lte(mut self, version: i64) -> Self {
        self.lte = Some(version);
        self
    }

    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A bounded slice of the notification feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQuery {
    pub start: i64,
    pub limit: usize,
    pub stop: Option<i64>,
    pub topics: Vec<String>,
    /// When false, `start` itself is excluded.
    pub inclusive_of_start: bool,
}

impl NotificationQuery {
    /// Notifications with `id >= start`, at most `limit` of them.
    pub fn new(start: i64, limit: usize) -> Self {
        Self {
            start,
            limit,
            stop: None,
            topics: Vec::new(),
            inclusive_of_start: true,
        }
    }

    /// Notifications strictly after `last_seen`, the shape followers use to resume.
    pub fn after(last_seen: i64, limit: usize) -> Self {
        Self {
            inclusive_of_start: false,
            ..Self::new(last_seen, limit)
        }
    }

    pub fn stop(mut self, stop: i64) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// The smallest id this query can return.
    pub fn lower_bound(&self) -> i64 {
        if self.inclusive_of_start {
            self.start
        } else {
            self.start.saturating_add(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_maps_to_fixed_tables() {
        assert_eq!(RecordKind::Events.table(), "stored_events");
        assert_eq!(RecordKind::Snapshots.table(), "snapshots");
        assert_eq!(RecordKind::Events.id_column(), "id");
        assert_eq!(RecordKind::Snapshots.id_column(), "uid");
        assert_ne!(
            RecordKind::Events.version_constraint(),
            RecordKind::Snapshots.version_constraint()
        );
    }

    #[test]
    fn notification_query_bounds() {
        let inclusive = NotificationQuery::new(5, 10);
        assert_eq!(inclusive.lower_bound(), 5);

        let exclusive = NotificationQuery::after(5, 10);
        assert_eq!(exclusive.lower_bound(), 6);
        assert_eq!(exclusive.limit, 10);

        let filtered = NotificationQuery::new(1, 3).stop(9).topics(["a", "b"]);
        assert_eq!(filtered.stop, Some(9));
        assert_eq!(filtered.topics, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn event_query_builder() {
        let q = EventQuery::new().gt(2).lte(5).desc().limit(2);
        assert_eq!(q.gt, Some(2));
        assert_eq!(q.lte, Some(5));
        assert!(q.desc);
        assert_eq!(q.limit, Some(2));
        assert_eq!(EventQuery::default(), EventQuery::new());
    }

    #[test]
    fn notification_converts_back_to_stored_event() {
        let id = Uuid::new_v4();
        let n = Notification {
            id: 7,
            originator_id: id,
            originator_version: 3,
            topic: "topic".to_string(),
            state: b"state".to_vec(),
        };
        assert_eq!(n.into_stored_event(), StoredEvent::new(id, 3, "topic", b"state".to_vec()));
    }

    #[test]
    fn notification_serializes_as_json() {
        let n = Notification {
            id: 1,
            originator_id: Uuid::nil(),
            originator_version: 1,
            topic: "t".to_string(),
            state: vec![1, 2],
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["topic"], "t");
        assert_eq!(json["state"], serde_json::json!([1, 2]));
    }
}
