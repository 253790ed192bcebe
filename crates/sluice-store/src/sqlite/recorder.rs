// ABOUTME: SQLite implementations of the aggregate, application, and process recorders.
// ABOUTME: Each recorder wraps the one below it; every write batch is one IMMEDIATE transaction.

use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, TransactionBehavior, params, params_from_iter};
use sluice_core::recorder::Result;
use sluice_core::{
    AppendOnlyLog, EventQuery, LedgerTransaction, Notification, NotificationFeed,
    NotificationQuery, RecordKind, StoredEvent, Tracking, TrackingLedger,
};
use uuid::Uuid;

use super::{PinnedConnection, SqliteDatastore, run_blocking};

/// Per-aggregate log over the events or snapshots table.
#[derive(Clone)]
pub struct SqliteAggregateRecorder {
    store: SqliteDatastore,
    application_name: String,
    kind: RecordKind,
}

impl SqliteAggregateRecorder {
    pub(crate) fn new(store: SqliteDatastore, application_name: String, kind: RecordKind) -> Self {
        Self {
            store,
            application_name,
            kind,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

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
        let application_name = self.application_name.clone();
        let kind = self.kind;
        let events = events.to_vec();
        let tracking = tracking.cloned();
        let ids = self
            .store
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let ids = insert_rows(&tx, &application_name, kind, &events, tracking.as_ref())?;
                tx.commit()?;
                Ok(ids)
            })
            .await
            .inspect_err(|e| tracing::debug!("insert rolled back: {e}"))?;
        tracing::debug!("inserted {} rows", ids.len());
        Ok(ids)
    }

    async fn read_events(&self, originator_id: Uuid, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        let mut sql = format!(
            "SELECT originator_id, originator_version, topic, state FROM {}
             WHERE application_name = ? AND originator_id = ?",
            self.kind.table()
        );
        let mut values = vec![
            Value::Text(self.application_name.clone()),
            Value::Text(originator_id.to_string()),
        ];
        if let Some(gt) = query.gt {
            sql.push_str(" AND originator_version > ?");
            values.push(Value::Integer(gt));
        }
        if let Some(lte) = query.lte {
            sql.push_str(" AND originator_version <= ?");
            values.push(Value::Integer(lte));
        }
        sql.push_str(if query.desc {
            " ORDER BY originator_version DESC"
        } else {
            " ORDER BY originator_version ASC"
        });
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(sql_limit(limit)));
        }

        self.store
            .with_connection(move |conn| {
                select(conn, &sql, values, |row| {
                    Ok(StoredEvent {
                        originator_id: uuid_column(row, 0)?,
                        originator_version: row.get(1)?,
                        topic: row.get(2)?,
                        state: row.get(3)?,
                    })
                })
            })
            .await
    }
}

#[async_trait]
impl AppendOnlyLog for SqliteAggregateRecorder {
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
pub struct SqliteApplicationRecorder {
    log: SqliteAggregateRecorder,
}

impl SqliteApplicationRecorder {
    pub(crate) fn new(log: SqliteAggregateRecorder) -> Self {
        debug_assert_eq!(log.kind, RecordKind::Events);
        Self { log }
    }
}

#[async_trait]
impl AppendOnlyLog for SqliteApplicationRecorder {
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
impl NotificationFeed for SqliteApplicationRecorder {
    async fn select_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        let mut sql = String::from(
            "SELECT id, originator_id, originator_version, topic, state FROM stored_events
             WHERE application_name = ? AND id >= ?",
        );
        let mut values = vec![
            Value::Text(self.log.application_name.clone()),
            Value::Integer(query.lower_bound()),
        ];
        if let Some(stop) = query.stop {
            sql.push_str(" AND id <= ?");
            values.push(Value::Integer(stop));
        }
        if !query.topics.is_empty() {
            let placeholders = vec!["?"; query.topics.len()].join(", ");
            sql.push_str(&format!(" AND topic IN ({placeholders})"));
            values.extend(query.topics.iter().cloned().map(Value::Text));
        }
        sql.push_str(" ORDER BY id ASC LIMIT ?");
        values.push(Value::Integer(sql_limit(query.limit)));

        self.log
            .store
            .with_connection(move |conn| {
                select(conn, &sql, values, |row| {
                    Ok(Notification {
                        id: row.get(0)?,
                        originator_id: uuid_column(row, 1)?,
                        originator_version: row.get(2)?,
                        topic: row.get(3)?,
                        state: row.get(4)?,
                    })
                })
            })
            .await
    }

    async fn max_notification_id(&self) -> Result<i64> {
        let application_name = self.log.application_name.clone();
        self.log
            .store
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT COALESCE(MAX(id), 0) FROM stored_events WHERE application_name = ?1",
                    params![application_name],
                    |row| row.get(0),
                )
            })
            .await
    }
}

/// Application recorder whose inserts can carry a follower's tracking watermark.
#[derive(Clone)]
pub struct SqliteProcessRecorder {
    feed: SqliteApplicationRecorder,
}

impl SqliteProcessRecorder {
    pub(crate) fn new(feed: SqliteApplicationRecorder) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl AppendOnlyLog for SqliteProcessRecorder {
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
impl NotificationFeed for SqliteProcessRecorder {
    async fn select_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        self.feed.select_notifications(query).await
    }

    async fn max_notification_id(&self) -> Result<i64> {
        self.feed.max_notification_id().await
    }
}

#[async_trait]
impl TrackingLedger for SqliteProcessRecorder {
    async fn insert_events_with_tracking(
        &self,
        events: &[StoredEvent],
        tracking: Option<&Tracking>,
    ) -> Result<Vec<i64>> {
        self.feed.log.write(events, tracking).await
    }

    async fn max_tracking_id(&self, upstream: &str) -> Result<i64> {
        let application_name = self.feed.log.application_name.clone();
        let upstream = upstream.to_string();
        self.feed
            .log
            .store
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT COALESCE(MAX(notification_id), 0) FROM notification_tracking
                     WHERE application_name = ?1 AND upstream_application_name = ?2",
                    params![application_name, upstream],
                    |row| row.get(0),
                )
            })
            .await
    }

    async fn has_tracking_id(&self, upstream: &str, notification_id: i64) -> Result<bool> {
        let application_name = self.feed.log.application_name.clone();
        let upstream = upstream.to_string();
        self.feed
            .log
            .store
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM notification_tracking
                     WHERE application_name = ?1 AND upstream_application_name = ?2
                     AND notification_id = ?3)",
                    params![application_name, upstream, notification_id],
                    |row| row.get(0),
                )
            })
            .await
    }

    /// Opens a second connection to the datastore's file, so the shared
    /// connection stays free for reads while the transaction is open.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let store = self.feed.log.store.clone();
        let side = run_blocking(move || store.open_side_connection()).await??;
        let mut conn = PinnedConnection::new(Box::new(side));
        conn.run(|conn| conn.execute_batch("BEGIN IMMEDIATE"))
            .await?;
        Ok(Box::new(SqliteLedgerTransaction {
            conn,
            application_name: self.feed.log.application_name.clone(),
        }))
    }
}

/// An open `BEGIN IMMEDIATE` transaction on a connection of its own.
///
/// Closing that connection without a commit rolls the transaction back.
pub struct SqliteLedgerTransaction {
    conn: PinnedConnection<Box<Connection>>,
    application_name: String,
}

#[async_trait]
impl LedgerTransaction for SqliteLedgerTransaction {
    async fn insert_events_with_tracking(
        &mut self,
        events: &[StoredEvent],
        tracking: Option<&Tracking>,
    ) -> Result<Vec<i64>> {
        let application_name = self.application_name.clone();
        let events = events.to_vec();
        let tracking = tracking.cloned();
        self.conn
            .run(move |conn| {
                let sp = conn.savepoint()?;
                let ids = insert_rows(
                    &sp,
                    &application_name,
                    RecordKind::Events,
                    &events,
                    tracking.as_ref(),
                )?;
                sp.commit()?;
                Ok(ids)
            })
            .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.conn.run(|conn| conn.execute_batch("COMMIT")).await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.conn.run(|conn| conn.execute_batch("ROLLBACK")).await
    }
}

/// Insert a batch and optional tracking row on a connection that is
/// already inside a transaction or savepoint.
fn insert_rows(
    tx: &Connection,
    application_name: &str,
    kind: RecordKind,
    events: &[StoredEvent],
    tracking: Option<&Tracking>,
) -> rusqlite::Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(events.len());
    {
        let sql = format!(
            "INSERT INTO {} (application_name, originator_id, originator_version, topic, state)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            kind.table()
        );
        let mut stmt = tx.prepare_cached(&sql)?;
        for event in events {
            stmt.execute(params![
                application_name,
                event.originator_id.to_string(),
                event.originator_version,
                event.topic,
                event.state,
            ])?;
            ids.push(tx.last_insert_rowid());
        }
    }
    if let Some(tracking) = tracking {
        tx.execute(
            "INSERT INTO notification_tracking
             (application_name, upstream_application_name, notification_id)
             VALUES (?1, ?2, ?3)",
            params![
                application_name,
                tracking.application_name,
                tracking.notification_id
            ],
        )?;
    }
    Ok(ids)
}

fn select<T>(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params_from_iter(values), map)?;
    rows.collect()
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
