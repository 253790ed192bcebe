// ABOUTME: Capability traits implemented by every storage backend.
// ABOUTME: AppendOnlyLog -> NotificationFeed -> TrackingLedger, plus the ledger and admin transactions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::record::{EventQuery, Notification, NotificationQuery, StoredEvent, Tracking};

pub type Result<T, E = PersistenceError> = std::result::Result<T, E>;

/// Per-aggregate event log with optimistic concurrency.
#[async_trait]
pub trait AppendOnlyLog: Send + Sync {
    /// The application whose rows this recorder reads and writes.
    fn application_name(&self) -> &str;

    /// Insert a batch atomically.
    ///
    /// A duplicate `(originator_id, originator_version)` fails the whole
    /// batch with [`PersistenceError::Conflict`]. Returns the assigned
    /// notification ids when the table has a notification sequence.
    async fn insert_events(&self, events: &[StoredEvent]) -> Result<Option<Vec<i64>>>;

    /// Events of one originator, bounded and ordered by `query`.
    async fn select_events(&self, originator_id: Uuid, query: &EventQuery)
    -> Result<Vec<StoredEvent>>;
}

/// Total-ordered feed over all of one application's stored events.
#[async_trait]
pub trait NotificationFeed: AppendOnlyLog {
    async fn select_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>>;

    /// Highest committed notification id, `0` when the feed is empty.
    async fn max_notification_id(&self) -> Result<i64>;
}

/// Event insertion coupled with a follower's "processed up to" watermark.
#[async_trait]
pub trait TrackingLedger: NotificationFeed {
    /// Insert a batch and, when given, the tracking row in the same transaction.
    ///
    /// A tracking row that already exists fails with
    /// [`PersistenceError::Integrity`] and none of the events are kept.
    async fn insert_events_with_tracking(
        &self,
        events: &[StoredEvent],
        tracking: Option<&Tracking>,
    ) -> Result<Vec<i64>>;

    /// Highest notification id tracked from `upstream`, `0` when none.
    async fn max_tracking_id(&self, upstream: &str) -> Result<i64>;

    async fn has_tracking_id(&self, upstream: &str, notification_id: i64) -> Result<bool>;

    /// Open a transaction for tracked inserts that land together on commit.
    ///
    /// Reads through this recorder do not see the transaction's rows until
    /// it commits.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;
}

/// An open transaction over one process recorder's tracked inserts.
///
/// Dropping it without calling [`commit`](Self::commit) rolls it back.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Insert a batch and its tracking row, as
    /// [`TrackingLedger::insert_events_with_tracking`] does, without
    /// committing. A failed call undoes only its own rows.
    async fn insert_events_with_tracking(
        &mut self,
        events: &[StoredEvent],
        tracking: Option<&Tracking>,
    ) -> Result<Vec<i64>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Followers and the upstream applications they hold tracking rows for.
pub type FollowerMap = BTreeMap<String, Vec<String>>;

/// Operator access to tracking rows across all followers.
#[async_trait]
pub trait TrackingAdmin: Send + Sync {
    /// Distinct `(follower, upstream)` pairs grouped by follower, both sorted.
    async fn list_followers(&self) -> Result<FollowerMap>;

    /// Open a transaction for administrative writes.
    async fn begin(&self) -> Result<Box<dyn AdminTransaction>>;
}

/// An open administrative transaction.
///
/// Dropping it without calling [`commit`](Self::commit) rolls it back.
#[async_trait]
pub trait AdminTransaction: Send {
    /// Delete the follower's tracking rows for the given upstreams.
    /// Returns the number of rows removed.
    async fn delete_tracking(&mut self, follower: &str, upstreams: &[String]) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
