// ABOUTME: Postgres implementations of the aggregate, application, and process recorders.
// ABOUTME: Queries are assembled with sqlx's QueryBuilder; inserts hold an EXCLUSIVE table lock.

use async_trait::async_trait;
use sluice_core::recorder::Result;
use sluice_core::{
    AppendOnlyLog, EventQuery, LedgerTransaction, Notification, NotificationFeed,
    NotificationQuery, RecordKind, StoredEvent, Tracking, TrackingLedger,
};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use super::{PgDatastore, translate};

// Each event binds five parameters; Postgres caps a statement at 65535.
const INSERT_CHUNK: usize = 1000;

/// Per-aggregate log over the events or snapshots table.
#[derive(Clone)]
pub struct PgAggregateRecorder {
    store: PgDatastore,
    application_name: String,
    kind: RecordKind,
}

impl PgAggregateRecorder {
    pub(crate) fn new(store: PgDatastore, application_name: String, kind: RecordKind) -> Self {
        Self {
            store,
            application_name,
            kind,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Insert a batch and optional tracking row in one transaction.
    ///
    /// The table lock makes concurrent writers commit one after another, so
    /// a reader that has seen id `n` never later finds a new row below `n`.
    #[tracing::instrument(
        skip(self, events, tracking),
        fields(
            application = %self.application_name,
            table = self.kind.table(),
            events_len = events.len(),
            tracked = tracking.is_some()
        )
    )]
    async fn write(&self, events: &[StoredEvent], tracking: Option<&Tracking>) -> Result<Vec<i64>> {
        let mut tx = self.store.pool().begin().await.map_err(translate)?;
        let ids = insert_rows(&mut tx, &self.application_name, self.kind, events, tracking).await?;
        tx.commit().await.map_err(translate)?;
        tracing::debug!("inserted {} rows", ids.len());
        Ok(ids)
    }

    async fn read_events(&self, originator_id: Uuid, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT originator_id, originator_version, topic, state FROM {} WHERE application_name = ",
            self.kind.table()
        ));
        qb.push_bind(&self.application_name);
        qb.push(" AND originator_id = ").push_bind(originator_id);
        if let Some(gt) = query.gt {
            qb.push(" AND originator_version > ").push_bind(gt);
        }
        if let Some(lte) = query.lte {
            qb.push(" AND originator_version <= ").push_bind(lte);
        }
        qb.push(if query.desc {
            " ORDER BY originator_version DESC"
        } else {
            " ORDER BY originator_version ASC"
        });
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(sql_limit(limit));
        }

        let rows = qb
            .build()
            .fetch_all(self.store.pool())
            .await
            .map_err(translate)?;
        rows.iter()
            .map(|row| {
                Ok(StoredEvent {
                    originator_id: row.try_get("originator_id")?,
                    originator_version: row.try_get("originator_version")?,
                    topic: row.try_get("topic")?,
                    state: row.try_get("state")?,
                })
            })
            .collect::<std::result::Result<_, sqlx::Error>>()
            .map_err(translate)
    }
}

#[async_trait]
impl AppendOnlyLog for PgAggregateRecorder {
    fn application_name(&self) -> &str {
        &self.application_name
    }

    async fn insert_events(&self, events: &[StoredEvent]) -> Result<Option<Vec<i64>>> {
        self.write(events, None).await?;
        Ok(None)
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        query: &EventQuery,
    ) -> Result<Vec<StoredEvent>> {
        self.read_events(originator_id, query).await
    }
}

/// Aggregate recorder over the events table plus the application's notification feed.
#[derive(Clone)]
pub struct PgApplicationRecorder {
    log: PgAggregateRecorder,
}

impl PgApplicationRecorder {
    pub(crate) fn new(log: PgAggregateRecorder) -> Self {
        debug_assert_eq!(log.kind, RecordKind::Events);
        Self { log }
    }
}

#[async_trait]
impl AppendOnlyLog for PgApplicationRecorder {
    fn application_name(&self) -> &str {
        &self.log.application_name
    }

    async fn insert_events(&self, events: &[StoredEvent]) -> Result<Option<Vec<i64>>> {
        self.log.write(events, None).await.map(Some)
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        query: &EventQuery,
    ) -> Result<Vec<StoredEvent>> {
        self.log.read_events(originator_id, query).await
    }
}

#[async_trait]
impl NotificationFeed for PgApplicationRecorder {
    async fn select_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, originator_id, originator_version, topic, state FROM stored_events
             WHERE application_name = ",
        );
        qb.push_bind(&self.log.application_name);
        qb.push(" AND id >= ").push_bind(query.lower_bound());
        if let Some(stop) = query.stop {
            qb.push(" AND id <= ").push_bind(stop);
        }
        if !query.topics.is_empty() {
            qb.push(" AND topic = ANY(").push_bind(&query.topics).push(")");
        }
        qb.push(" ORDER BY id ASC LIMIT ").push_bind(sql_limit(query.limit));

        let rows = qb
            .build()
            .fetch_all(self.log.store.pool())
            .await
            .map_err(translate)?;
        rows.iter()
            .map(notification_from_row)
            .collect::<std::result::Result<_, sqlx::Error>>()
            .map_err(translate)
    }

    async fn max_notification_id(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(id), 0) FROM stored_events WHERE application_name = $1",
        )
        .bind(&self.log.application_name)
        .fetch_one(self.log.store.pool())
        .await
        .map_err(translate)
    }
}

/// Lock the table, then insert a batch and optional tracking row on a
/// connection that is already inside a transaction.
async fn insert_rows(
    conn: &mut PgConnection,
    application_name: &str,
    kind: RecordKind,
    events: &[StoredEvent],
    tracking: Option<&Tracking>,
) -> Result<Vec<i64>> {
    sqlx::query(&format!("LOCK TABLE {} IN EXCLUSIVE MODE", kind.table()))
        .execute(&mut *conn)
        .await
        .map_err(translate)?;

    let mut ids = Vec::with_capacity(events.len());
    for chunk in events.chunks(INSERT_CHUNK) {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} (application_name, originator_id, originator_version, topic, state) ",
            kind.table()
        ));
        qb.push_values(chunk, |mut b, event| {
            b.push_bind(application_name)
                .push_bind(event.originator_id)
                .push_bind(event.originator_version)
                .push_bind(&event.topic)
                .push_bind(&event.state);
        });
        qb.push(format!(" RETURNING {}", kind.id_column()));

        let returned: Vec<i64> = qb
            .build_query_scalar()
            .fetch_all(&mut *conn)
            .await
            .map_err(translate)?;
        ids.extend(returned);
    }

    if let Some(tracking) = tracking {
        sqlx::query(
            "INSERT INTO notification_tracking
             (application_name, upstream_application_name, notification_id)
             VALUES ($1, $2, $3)",
        )
        .bind(application_name)
        .bind(&tracking.application_name)
        .bind(tracking.notification_id)
        .execute(&mut *conn)
        .await
        .map_err(translate)?;
    }
    Ok(ids)
}

fn notification_from_row(row: &PgRow) -> std::result::Result<Notification, sqlx::Error> {
    Ok(Notification {
        id: row.try_get("id")?,
        originator_id: row.try_get("originator_id")?,
        originator_version: row.try_get("originator_version")?,
        topic: row.try_get("topic")?,
        state: row.try_get("state")?,
    })
}

/// Application recorder whose inserts can carry a follower's tracking watermark.
#[derive(Clone)]
pub struct PgProcessRecorder {
    feed: PgApplicationRecorder,
}

impl PgProcessRecorder {
    pub(crate) fn new(feed: PgApplicationRecorder) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl AppendOnlyLog for PgProcessRecorder {
    fn application_name(&self) -> &str {
        self.feed.application_name()
    }

    async fn insert_events(&self, events: &[StoredEvent]) -> Result<Option<Vec<i64>>> {
        self.feed.insert_events(events).await
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        query: &EventQuery,
    ) -> Result<Vec<StoredEvent>> {
        self.feed.select_events(originator_id, query).await
    }
}

#[async_trait]
impl NotificationFeed for PgProcessRecorder {
    async fn select_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        self.feed.select_notifications(query).await
    }

    async fn max_notification_id(&self) -> Result<i64> {
        self.feed.max_notification_id().await
    }
}

#[async_trait]
impl TrackingLedger for PgProcessRecorder {
    async fn insert_events_with_tracking(
        &self,
        events: &[StoredEvent],
        tracking: Option<&Tracking>,
    ) -> Result<Vec<i64>> {
        self.feed.log.write(events, tracking).await
    }

    async fn max_tracking_id(&self, upstream: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(notification_id), 0) FROM notification_tracking
             WHERE application_name = $1 AND upstream_application_name = $2",
        )
        .bind(&self.feed.log.application_name)
        .bind(upstream)
        .fetch_one(self.feed.log.store.pool())
        .await
        .map_err(translate)
    }

    async fn has_tracking_id(&self, upstream: &str, notification_id: i64) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM notification_tracking
             WHERE application_name = $1 AND upstream_application_name = $2
             AND notification_id = $3)",
        )
        .bind(&self.feed.log.application_name)
        .bind(upstream)
        .bind(notification_id)
        .fetch_one(self.feed.log.store.pool())
        .await
        .map_err(translate)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let tx = self.feed.log.store.pool().begin().await.map_err(translate)?;
        Ok(Box::new(PgLedgerTransaction {
            tx,
            application_name: self.feed.log.application_name.clone(),
        }))
    }
}

/// An open transaction on a pooled connection. The events table lock taken
/// by the first insert is held until commit or rollback.
pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
    application_name: String,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn insert_events_with_tracking(
        &mut self,
        events: &[StoredEvent],
        tracking: Option<&Tracking>,
    ) -> Result<Vec<i64>> {
        let mut savepoint = sqlx::Connection::begin(&mut *self.tx)
            .await
            .map_err(translate)?;
        let ids = insert_rows(
            &mut savepoint,
            &self.application_name,
            RecordKind::Events,
            events,
            tracking,
        )
        .await?;
        savepoint.commit().await.map_err(translate)?;
        Ok(ids)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(translate)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(translate)
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
