// ABOUTME: DDL for the three record tables on each supported backend.
// ABOUTME: Statements are idempotent so they can run every time a datastore opens.

/// Unique constraint on a follower's tracking rows.
pub const TRACKING_CONSTRAINT: &str = "notification_tracking_key";

/// SQLite schema. Ids use AUTOINCREMENT so a rolled-back or deleted id is never reused.
pub const SQLITE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS stored_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        application_name TEXT NOT NULL,
        originator_id TEXT NOT NULL,
        originator_version INTEGER NOT NULL,
        topic TEXT NOT NULL,
        state BLOB NOT NULL,
        CONSTRAINT stored_events_version_key
            UNIQUE (application_name, originator_id, originator_version),
        CONSTRAINT stored_events_app_id_key UNIQUE (application_name, id)
    )",
    "CREATE TABLE IF NOT EXISTS snapshots (
        uid INTEGER PRIMARY KEY AUTOINCREMENT,
        application_name TEXT NOT NULL,
        originator_id TEXT NOT NULL,
        originator_version INTEGER NOT NULL,
        topic TEXT NOT NULL,
        state BLOB NOT NULL,
        CONSTRAINT snapshots_version_key
            UNIQUE (application_name, originator_id, originator_version)
    )",
    "CREATE TABLE IF NOT EXISTS notification_tracking (
        uid INTEGER PRIMARY KEY AUTOINCREMENT,
        application_name TEXT NOT NULL,
        upstream_application_name TEXT NOT NULL,
        notification_id INTEGER NOT NULL,
        CONSTRAINT notification_tracking_key
            UNIQUE (application_name, upstream_application_name, notification_id)
    )",
];

/// Postgres schema.
pub const POSTGRES_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS stored_events (
        id BIGSERIAL PRIMARY KEY,
        application_name TEXT NOT NULL,
        originator_id UUID NOT NULL,
        originator_version BIGINT NOT NULL,
        topic TEXT NOT NULL,
        state BYTEA NOT NULL,
        CONSTRAINT stored_events_version_key
            UNIQUE (application_name, originator_id, originator_version),
        CONSTRAINT stored_events_app_id_key UNIQUE (application_name, id)
    )",
    "CREATE TABLE IF NOT EXISTS snapshots (
        uid BIGSERIAL PRIMARY KEY,
        application_name TEXT NOT NULL,
        originator_id UUID NOT NULL,
        originator_version BIGINT NOT NULL,
        topic TEXT NOT NULL,
        state BYTEA NOT NULL,
        CONSTRAINT snapshots_version_key
            UNIQUE (application_name, originator_id, originator_version)
    )",
    "CREATE TABLE IF NOT EXISTS notification_tracking (
        uid BIGSERIAL PRIMARY KEY,
        application_name TEXT NOT NULL,
        upstream_application_name TEXT NOT NULL,
        notification_id BIGINT NOT NULL,
        CONSTRAINT notification_tracking_key
            UNIQUE (application_name, upstream_application_name, notification_id)
    )",
];

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::RecordKind;

    #[test]
    fn schemas_name_the_version_constraints() {
        for schema in [SQLITE_SCHEMA, POSTGRES_SCHEMA] {
            let ddl = schema.join("\n");
            for kind in [RecordKind::Events, RecordKind::Snapshots] {
                assert!(ddl.contains(kind.table()));
                assert!(ddl.contains(kind.version_constraint()));
            }
            assert!(ddl.contains(TRACKING_CONSTRAINT));
        }
    }

    #[test]
    fn sqlite_schema_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for _ in 0..2 {
            for statement in SQLITE_SCHEMA {
                conn.execute_batch(statement).unwrap();
            }
        }
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('stored_events', 'snapshots', 'notification_tracking')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
