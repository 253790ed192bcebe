// ABOUTME: Operator access to SQLite tracking rows: follower listing and transactional deletes.
// ABOUTME: The admin transaction holds the datastore lock until it is committed or rolled back.

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use sluice_core::recorder::Result;
use sluice_core::{AdminTransaction, FollowerMap, TrackingAdmin};
use tokio::sync::OwnedMutexGuard;

use super::{PinnedConnection, SqliteDatastore};

pub struct SqliteTrackingAdmin {
    store: SqliteDatastore,
}

impl SqliteTrackingAdmin {
    pub(crate) fn new(store: SqliteDatastore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TrackingAdmin for SqliteTrackingAdmin {
    async fn list_followers(&self) -> Result<FollowerMap> {
        self.store.with_connection(|conn| list_followers(conn)).await
    }

    async fn begin(&self) -> Result<Box<dyn AdminTransaction>> {
        let guard = self.store.connection().clone().lock_owned().await;
        let mut conn = PinnedConnection::new(guard);
        conn.run(|conn| conn.execute_batch("BEGIN IMMEDIATE"))
            .await?;
        Ok(Box::new(SqliteAdminTransaction { conn, open: true }))
    }
}

fn list_followers(conn: &Connection) -> rusqlite::Result<FollowerMap> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT application_name, upstream_application_name
         FROM notification_tracking
         ORDER BY application_name, upstream_application_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut followers = FollowerMap::new();
    for row in rows {
        let (follower, upstream) = row?;
        followers.entry(follower).or_default().push(upstream);
    }
    Ok(followers)
}

/// An open `BEGIN IMMEDIATE` transaction on the datastore's connection.
pub struct SqliteAdminTransaction {
    conn: PinnedConnection<OwnedMutexGuard<Connection>>,
    open: bool,
}

#[async_trait]
impl AdminTransaction for SqliteAdminTransaction {
    async fn delete_tracking(&mut self, follower: &str, upstreams: &[String]) -> Result<u64> {
        if upstreams.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; upstreams.len()].join(", ");
        let sql = format!(
            "DELETE FROM notification_tracking
             WHERE application_name = ? AND upstream_application_name IN ({placeholders})"
        );
        let values: Vec<Value> = std::iter::once(Value::Text(follower.to_string()))
            .chain(upstreams.iter().cloned().map(Value::Text))
            .collect();

        let deleted = self
            .conn
            .run(move |conn| conn.execute(&sql, params_from_iter(values)))
            .await?;
        tracing::debug!(follower, deleted, "deleted tracking rows");
        Ok(deleted as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.conn.run(|conn| conn.execute_batch("COMMIT")).await?;
        this.open = false;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.conn.run(|conn| conn.execute_batch("ROLLBACK")).await?;
        this.open = false;
        Ok(())
    }
}

impl Drop for SqliteAdminTransaction {
    fn drop(&mut self) {
        if self.open
            && let Some(conn) = self.conn.get_mut()
            && let Err(e) = conn.execute_batch("ROLLBACK")
        {
            tracing::warn!("failed to roll back abandoned admin transaction: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{StoredEvent, Tracking, TrackingLedger};
    use uuid::Uuid;

    async fn seeded() -> SqliteDatastore {
        let store = SqliteDatastore::open_in_memory().unwrap();
        let app = store.process_recorder("Application");
        let other = store.process_recorder("AnotherApplication");
        let id = Uuid::new_v4();

        app.insert_events_with_tracking(
            &[StoredEvent::new(id, 1, "t", b"s".to_vec())],
            Some(&Tracking::new("upstream_app_1", 1)),
        )
        .await
        .unwrap();
        app.insert_events_with_tracking(&[], Some(&Tracking::new("upstream_app_2", 1)))
            .await
            .unwrap();
        app.insert_events_with_tracking(&[], Some(&Tracking::new("upstream_app_2", 2)))
            .await
            .unwrap();
        other
            .insert_events_with_tracking(&[], Some(&Tracking::new("upstream_app_2", 2)))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn lists_followers_sorted() {
        let store = seeded().await;
        let followers = store.tracking_admin().list_followers().await.unwrap();

        let names: Vec<&str> = followers.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["AnotherApplication", "Application"]);
        assert_eq!(
            followers["Application"],
            vec!["upstream_app_1".to_string(), "upstream_app_2".to_string()]
        );
        assert_eq!(followers["AnotherApplication"], vec!["upstream_app_2".to_string()]);
    }

    #[tokio::test]
    async fn committed_delete_resets_watermarks() {
        let store = seeded().await;
        let admin = store.tracking_admin();
        let recorder = store.process_recorder("Application");

        let mut tx = admin.begin().await.unwrap();
        let deleted = tx
            .delete_tracking("Application", &["upstream_app_2".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        tx.commit().await.unwrap();

        assert_eq!(recorder.max_tracking_id("upstream_app_2").await.unwrap(), 0);
        assert_eq!(recorder.max_tracking_id("upstream_app_1").await.unwrap(), 1);
        let other = store.process_recorder("AnotherApplication");
        assert_eq!(other.max_tracking_id("upstream_app_2").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rolled_back_delete_changes_nothing() {
        let store = seeded().await;
        let admin = store.tracking_admin();
        let recorder = store.process_recorder("Application");

        let mut tx = admin.begin().await.unwrap();
        let deleted = tx
            .delete_tracking(
                "Application",
                &["upstream_app_1".to_string(), "upstream_app_2".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        tx.rollback().await.unwrap();

        assert_eq!(recorder.max_tracking_id("upstream_app_1").await.unwrap(), 1);
        assert_eq!(recorder.max_tracking_id("upstream_app_2").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_and_releases_lock() {
        let store = seeded().await;
        let admin = store.tracking_admin();
        {
            let mut tx = admin.begin().await.unwrap();
            tx.delete_tracking("Application", &["upstream_app_1".to_string()])
                .await
                .unwrap();
        }

        let recorder = store.process_recorder("Application");
        assert_eq!(recorder.max_tracking_id("upstream_app_1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_upstream_list_deletes_nothing() {
        let store = seeded().await;
        let mut tx = store.tracking_admin().begin().await.unwrap();
        assert_eq!(tx.delete_tracking("Application", &[]).await.unwrap(), 0);
        tx.commit().await.unwrap();
    }
}
