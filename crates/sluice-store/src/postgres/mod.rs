// ABOUTME: Postgres datastore: a sqlx connection pool shared by recorders and the tracking admin.
// ABOUTME: Inserts serialize on a per-table EXCLUSIVE lock held for the write transaction.

//! Writers serialize on an `EXCLUSIVE` table lock taken inside each insert
//! transaction, which blocks other writers but not plain `SELECT`s. The lock
//! is released when the transaction commits or rolls back.

mod admin;
mod error;
mod recorder;

use sluice_core::{PersistenceError, RecordKind};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::schema::POSTGRES_SCHEMA;

pub use admin::{PgAdminTransaction, PgTrackingAdmin};
pub use recorder::{
    PgAggregateRecorder, PgApplicationRecorder, PgLedgerTransaction, PgProcessRecorder,
};

pub(crate) use error::translate;

/// A Postgres connection pool shared by every recorder built from it.
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool of at most `max_connections`.
    #[tracing::instrument(skip(url))]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(translate)?;
        Ok(Self::new(pool))
    }

    /// Create any missing record tables (idempotent).
    #[tracing::instrument(skip(self))]
    pub async fn create_tables(&self) -> Result<(), PersistenceError> {
        for statement in POSTGRES_SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(translate)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn aggregate_recorder(
        &self,
        application_name: impl Into<String>,
        kind: RecordKind,
    ) -> PgAggregateRecorder {
        PgAggregateRecorder::new(self.clone(), application_name.into(), kind)
    }

    pub fn application_recorder(&self, application_name: impl Into<String>) -> PgApplicationRecorder {
        PgApplicationRecorder::new(self.aggregate_recorder(application_name, RecordKind::Events))
    }

    pub fn process_recorder(&self, application_name: impl Into<String>) -> PgProcessRecorder {
        PgProcessRecorder::new(self.application_recorder(application_name))
    }

    pub fn tracking_admin(&self) -> PgTrackingAdmin {
        PgTrackingAdmin::new(self.clone())
    }
}
