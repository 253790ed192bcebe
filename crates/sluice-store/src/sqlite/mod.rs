// ABOUTME: SQLite datastore: one connection guarded by the process-local insert lock.
// ABOUTME: Recorders and the tracking admin built from a datastore all share that lock.

mod admin;
mod error;
mod recorder;

use std::fs;
use std::ops::DerefMut;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use sluice_core::{PersistenceError, RecordKind};
use tokio::sync::Mutex;

use crate::schema::SQLITE_SCHEMA;

pub use admin::{SqliteAdminTransaction, SqliteTrackingAdmin};
pub use recorder::{
    SqliteAggregateRecorder, SqliteApplicationRecorder, SqliteLedgerTransaction,
    SqliteProcessRecorder,
};

pub(crate) use error::translate;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// A SQLite database shared by every recorder built from it.
///
/// SQLite allows one writer at a time and does not make a multi-row batch
/// visible atomically to concurrent writers on the same connection, so all
/// access goes through a single mutex held for one call's critical section.
/// The lock is per datastore, not per process: two datastores opened on the
/// same file only have SQLite's own file locking between them.
///
/// Statements run on tokio's blocking pool so a busy wait never stalls a
/// runtime worker.
#[derive(Clone)]
pub struct SqliteDatastore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    busy_timeout: Duration,
}

impl SqliteDatastore {
    /// Open or create a database file with the default busy timeout,
    /// creating the record tables if they are missing.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        Self::open_with(path, DEFAULT_BUSY_TIMEOUT, true)
    }

    /// Open or create a database file.
    ///
    /// File databases are switched to WAL so readers in other processes do
    /// not block behind the writer.
    pub fn open_with(
        path: &Path,
        busy_timeout: Duration,
        create_tables: bool,
    ) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::Operational(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).map_err(translate)?;
        conn.busy_timeout(busy_timeout).map_err(translate)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(translate)?;

        tracing::debug!("opened sqlite datastore at {}", path.display());
        Self::build(conn, Some(path.to_path_buf()), busy_timeout, create_tables)
    }

    /// A private in-memory database with the record tables created.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::open_in_memory_with(true)
    }

    pub fn open_in_memory_with(create_tables: bool) -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(translate)?;
        Self::from_connection(conn, create_tables)
    }

    /// Wrap an already configured connection.
    ///
    /// The file behind it is not known, so ledger transactions are not
    /// available on the result.
    pub fn from_connection(conn: Connection, create_tables: bool) -> Result<Self, PersistenceError> {
        Self::build(conn, None, DEFAULT_BUSY_TIMEOUT, create_tables)
    }

    fn build(
        conn: Connection,
        path: Option<PathBuf>,
        busy_timeout: Duration,
        create_tables: bool,
    ) -> Result<Self, PersistenceError> {
        if create_tables {
            apply_schema(&conn).map_err(translate)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            busy_timeout,
        })
    }

    /// Create any missing record tables.
    pub async fn create_tables(&self) -> Result<(), PersistenceError> {
        self.with_connection(|conn| apply_schema(conn)).await
    }

    /// Recorder over events or snapshots for one application.
    pub fn aggregate_recorder(
        &self,
        application_name: impl Into<String>,
        kind: RecordKind,
    ) -> SqliteAggregateRecorder {
        SqliteAggregateRecorder::new(self.clone(), application_name.into(), kind)
    }

    pub fn application_recorder(
        &self,
        application_name: impl Into<String>,
    ) -> SqliteApplicationRecorder {
        SqliteApplicationRecorder::new(self.aggregate_recorder(application_name, RecordKind::Events))
    }

    pub fn process_recorder(&self, application_name: impl Into<String>) -> SqliteProcessRecorder {
        SqliteProcessRecorder::new(self.application_recorder(application_name))
    }

    pub fn tracking_admin(&self) -> SqliteTrackingAdmin {
        SqliteTrackingAdmin::new(self.clone())
    }

    pub(crate) fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Run `work` on the blocking pool with the shared connection locked.
    pub(crate) async fn with_connection<T, F>(&self, work: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let mut conn = Arc::clone(&self.conn).lock_owned().await;
        run_blocking(move || work(&mut *conn))
            .await?
            .map_err(translate)
    }

    /// A second connection to the same file.
    ///
    /// A transaction on it leaves the shared connection free, and in WAL mode
    /// readers there keep seeing the last committed state.
    pub(crate) fn open_side_connection(&self) -> Result<Connection, PersistenceError> {
        let Some(path) = &self.path else {
            return Err(PersistenceError::NotSupported(
                "ledger transactions need a file database".to_string(),
            ));
        };
        let conn = Connection::open(path).map_err(translate)?;
        conn.busy_timeout(self.busy_timeout).map_err(translate)?;
        Ok(conn)
    }
}

/// A connection pinned to one open transaction.
///
/// Every statement runs on the blocking pool and the connection is handed
/// back afterwards. A worker that panics takes the connection with it.
pub(crate) struct PinnedConnection<C> {
    conn: Option<C>,
}

impl<C> PinnedConnection<C>
where
    C: DerefMut<Target = Connection> + Send + 'static,
{
    pub(crate) fn new(conn: C) -> Self {
        Self { conn: Some(conn) }
    }

    pub(crate) async fn run<T, F>(&mut self, work: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let mut conn = self.conn.take().ok_or_else(|| {
            PersistenceError::Internal("transaction connection lost by an earlier call".to_string())
        })?;
        let (conn, result) = run_blocking(move || {
            let result = work(&mut *conn);
            (conn, result)
        })
        .await?;
        self.conn = Some(conn);
        result.map_err(translate)
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut Connection> {
        self.conn.as_deref_mut()
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, PersistenceError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PersistenceError::Internal(format!("sqlite worker failed: {e}")))
}

fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    for statement in SQLITE_SCHEMA {
        conn.execute_batch(statement)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{AppendOnlyLog, NotificationFeed, StoredEvent};
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn file_datastore_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let originator_id = Uuid::new_v4();

        {
            let store = SqliteDatastore::open(&path).unwrap();
            let recorder = store.application_recorder("app");
            recorder
                .insert_events(&[StoredEvent::new(originator_id, 1, "topic1", b"state1".to_vec())])
                .await
                .unwrap();
        }

        let store = SqliteDatastore::open(&path).unwrap();
        let recorder = store.application_recorder("app");
        let events = recorder
            .select_events(originator_id, &Default::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(recorder.max_notification_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn tables_can_be_created_later() {
        let conn = Connection::open_in_memory().unwrap();
        let store = SqliteDatastore::from_connection(conn, false).unwrap();
        let recorder = store.application_recorder("app");

        let err = recorder.max_notification_id().await.unwrap_err();
        assert!(err.to_string().contains("no such table"), "unexpected: {err}");

        store.create_tables().await.unwrap();
        assert_eq!(recorder.max_notification_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn in_memory_datastore_can_skip_table_creation() {
        let store = SqliteDatastore::open_in_memory_with(false).unwrap();
        let recorder = store.application_recorder("app");
        assert!(recorder.max_notification_id().await.is_err());

        store.create_tables().await.unwrap();
        assert_eq!(recorder.max_notification_id().await.unwrap(), 0);
    }
}
