// ABOUTME: Opens the configured datastore and hands out recorders as trait objects.
// ABOUTME: Callers pick a purpose (aggregate, application, process, admin) without naming a backend.

use std::sync::Arc;

use sluice_core::{
    AppendOnlyLog, NotificationFeed, PersistenceError, RecordKind, TrackingAdmin, TrackingLedger,
};

use crate::config::{DatabaseUrl, StoreConfig};
#[cfg(feature = "postgres")]
use crate::postgres::PgDatastore;
use crate::sqlite::SqliteDatastore;

/// An opened datastore on one of the supported backends.
#[derive(Clone)]
pub enum Datastore {
    Sqlite(SqliteDatastore),
    #[cfg(feature = "postgres")]
    Postgres(PgDatastore),
}

impl Datastore {
    /// Open the datastore described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, PersistenceError> {
        let store = match &config.database {
            DatabaseUrl::SqliteMemory => {
                Self::Sqlite(SqliteDatastore::open_in_memory_with(config.create_tables)?)
            }
            DatabaseUrl::SqliteFile(path) => Self::Sqlite(SqliteDatastore::open_with(
                path,
                config.sqlite_busy_timeout,
                config.create_tables,
            )?),
            #[cfg(feature = "postgres")]
            DatabaseUrl::Postgres(url) => {
                let store = PgDatastore::connect(url, config.pg_max_connections).await?;
                if config.create_tables {
                    store.create_tables().await?;
                }
                Self::Postgres(store)
            }
            #[cfg(not(feature = "postgres"))]
            DatabaseUrl::Postgres(_) => {
                return Err(PersistenceError::NotSupported(
                    "this build has no Postgres support".to_string(),
                ));
            }
        };
        tracing::info!(backend = store.backend(), "datastore ready");
        Ok(store)
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => "postgres",
        }
    }

    pub async fn create_tables(&self) -> Result<(), PersistenceError> {
        match self {
            Self::Sqlite(store) => store.create_tables().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => store.create_tables().await,
        }
    }

    pub fn aggregate_recorder(
        &self,
        application_name: impl Into<String>,
        kind: RecordKind,
    ) -> Arc<dyn AppendOnlyLog> {
        match self {
            Self::Sqlite(store) => Arc::new(store.aggregate_recorder(application_name, kind)),
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => Arc::new(store.aggregate_recorder(application_name, kind)),
        }
    }

    pub fn application_recorder(
        &self,
        application_name: impl Into<String>,
    ) -> Arc<dyn NotificationFeed> {
        match self {
            Self::Sqlite(store) => Arc::new(store.application_recorder(application_name)),
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => Arc::new(store.application_recorder(application_name)),
        }
    }

    pub fn process_recorder(&self, application_name: impl Into<String>) -> Arc<dyn TrackingLedger> {
        match self {
            Self::Sqlite(store) => Arc::new(store.process_recorder(application_name)),
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => Arc::new(store.process_recorder(application_name)),
        }
    }

    pub fn tracking_admin(&self) -> Arc<dyn TrackingAdmin> {
        match self {
            Self::Sqlite(store) => Arc::new(store.tracking_admin()),
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => Arc::new(store.tracking_admin()),
        }
    }
}
