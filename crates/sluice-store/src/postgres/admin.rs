// ABOUTME: Operator access to Postgres tracking rows: follower listing and transactional deletes.
// ABOUTME: Dropping an uncommitted admin transaction rolls it back through sqlx.

use async_trait::async_trait;
use sluice_core::recorder::Result;
use sluice_core::{AdminTransaction, FollowerMap, TrackingAdmin};
use sqlx::{Postgres, Transaction};

use super::{PgDatastore, translate};

pub struct PgTrackingAdmin {
    store: PgDatastore,
}

impl PgTrackingAdmin {
    pub(crate) fn new(store: PgDatastore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TrackingAdmin for PgTrackingAdmin {
    async fn list_followers(&self) -> Result<FollowerMap> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT application_name, upstream_application_name
             FROM notification_tracking
             ORDER BY application_name, upstream_application_name",
        )
        .fetch_all(self.store.pool())
        .await
        .map_err(translate)?;

        let mut followers = FollowerMap::new();
        for (follower, upstream) in rows {
            followers.entry(follower).or_default().push(upstream);
        }
        Ok(followers)
    }

    async fn begin(&self) -> Result<Box<dyn AdminTransaction>> {
        let tx = self.store.pool().begin().await.map_err(translate)?;
        Ok(Box::new(PgAdminTransaction { tx }))
    }
}

/// An open transaction on a pooled Postgres connection.
pub struct PgAdminTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AdminTransaction for PgAdminTransaction {
    async fn delete_tracking(&mut self, follower: &str, upstreams: &[String]) -> Result<u64> {
        if upstreams.is_empty() {
            return Ok(0);
        }
        let deleted = sqlx::query(
            "DELETE FROM notification_tracking
             WHERE application_name = $1 AND upstream_application_name = ANY($2)",
        )
        .bind(follower)
        .bind(upstreams)
        .execute(&mut *self.tx)
        .await
        .map_err(translate)?
        .rows_affected();
        tracing::debug!(follower, deleted, "deleted tracking rows");
        Ok(deleted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(translate)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(translate)
    }
}
