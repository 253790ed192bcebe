//! Integration tests for the Postgres recorders.
//!
//! These run against the database named by `SLUICE_TEST_POSTGRES_URL` and
//! return early when it is unset. Every test uses fresh application names,
//! so they can share one database and run in parallel.

#![cfg(feature = "postgres")]

use sluice_core::{
    AdminTransaction, AppendOnlyLog, ErrorKind, EventQuery, LedgerTransaction, NotificationFeed,
    NotificationQuery, RecordKind, StoredEvent, Tracking, TrackingAdmin, TrackingLedger,
};
use sluice_store::PgDatastore;
use uuid::Uuid;

struct TestDb {
    store: PgDatastore,
}

impl TestDb {
    async fn connect() -> Option<Self> {
        let url = std::env::var("SLUICE_TEST_POSTGRES_URL").ok()?;
        let store = PgDatastore::connect(&url, 4).await.unwrap();
        store.create_tables().await.unwrap();
        Some(Self { store })
    }
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn event(id: Uuid, version: i64) -> StoredEvent {
    StoredEvent::new(id, version, "topic", format!("state{version}").into_bytes())
}

#[tokio::test]
async fn create_tables_is_idempotent() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    db.store.create_tables().await.unwrap();
}

#[tokio::test]
async fn aggregate_events_round_trip_with_bounds() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let recorder = db.store.aggregate_recorder(unique("app"), RecordKind::Events);
    let id = Uuid::new_v4();

    let returned = recorder
        .insert_events(&[event(id, 1), event(id, 2), event(id, 3)])
        .await
        .unwrap();
    assert_eq!(returned, None);

    let all = recorder.select_events(id, &EventQuery::new()).await.unwrap();
    assert_eq!(
        all.iter().map(|e| e.originator_version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(all[1].state, b"state2".to_vec());

    let window = recorder
        .select_events(id, &EventQuery::new().gt(1).lte(3).desc().limit(1))
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].originator_version, 3);
}

#[tokio::test]
async fn duplicate_version_conflicts_and_writes_nothing() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let recorder = db.store.application_recorder(unique("app"));
    let id = Uuid::new_v4();
    recorder.insert_events(&[event(id, 1)]).await.unwrap();

    let err = recorder
        .insert_events(&[event(id, 2), event(id, 1)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let events = recorder.select_events(id, &EventQuery::new()).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn notifications_follow_insert_order() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let recorder = db.store.application_recorder(unique("app"));
    assert_eq!(recorder.max_notification_id().await.unwrap(), 0);

    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let ids = recorder
        .insert_events(&[event(a, 1), event(b, 1)])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1]);
    assert_eq!(recorder.max_notification_id().await.unwrap(), ids[1]);

    let notifications = recorder
        .select_notifications(&NotificationQuery::new(ids[0], 10))
        .await
        .unwrap();
    assert_eq!(notifications.iter().map(|n| n.id).collect::<Vec<_>>(), ids);
    assert_eq!(notifications[1].originator_id, b);

    let after = recorder
        .select_notifications(&NotificationQuery::after(ids[0], 10))
        .await
        .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, ids[1]);

    let filtered = recorder
        .select_notifications(&NotificationQuery::new(ids[0], 10).topics(["other"]))
        .await
        .unwrap();
    assert!(filtered.is_empty());
}

#[tokio::test]
async fn tracking_is_recorded_atomically() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let upstream = unique("upstream");
    let recorder = db.store.process_recorder(unique("follower"));
    let id = Uuid::new_v4();

    recorder
        .insert_events_with_tracking(&[event(id, 1)], Some(&Tracking::new(&upstream, 5)))
        .await
        .unwrap();
    assert_eq!(recorder.max_tracking_id(&upstream).await.unwrap(), 5);
    assert!(recorder.has_tracking_id(&upstream, 5).await.unwrap());
    assert!(!recorder.has_tracking_id(&upstream, 4).await.unwrap());

    let err = recorder
        .insert_events_with_tracking(&[event(id, 2)], Some(&Tracking::new(&upstream, 5)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    let events = recorder.select_events(id, &EventQuery::new()).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn admin_transaction_commits_and_rolls_back() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let follower = unique("follower");
    let upstream = unique("upstream");
    let recorder = db.store.process_recorder(&follower);
    for notification_id in [1, 2] {
        recorder
            .insert_events_with_tracking(&[], Some(&Tracking::new(&upstream, notification_id)))
            .await
            .unwrap();
    }

    let admin = db.store.tracking_admin();
    let followers = admin.list_followers().await.unwrap();
    assert_eq!(followers[&follower], vec![upstream.clone()]);

    let mut tx = admin.begin().await.unwrap();
    assert_eq!(
        tx.delete_tracking(&follower, std::slice::from_ref(&upstream))
            .await
            .unwrap(),
        2
    );
    tx.rollback().await.unwrap();
    assert_eq!(recorder.max_tracking_id(&upstream).await.unwrap(), 2);

    let mut tx = admin.begin().await.unwrap();
    tx.delete_tracking(&follower, std::slice::from_ref(&upstream))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(recorder.max_tracking_id(&upstream).await.unwrap(), 0);
}

#[tokio::test]
async fn ledger_transaction_surfaces_conflicts_then_rolls_back() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let recorder = db.store.process_recorder(unique("follower"));
    let upstream = unique("upstream");
    let id = Uuid::new_v4();

    let mut tx = recorder.begin().await.unwrap();
    tx.insert_events_with_tracking(&[event(id, 1)], Some(&Tracking::new(upstream.as_str(), 1)))
        .await
        .unwrap();
    let err = tx
        .insert_events_with_tracking(&[event(id, 1)], Some(&Tracking::new(upstream.as_str(), 2)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Reads through the pool only see committed rows.
    assert_eq!(recorder.max_tracking_id(&upstream).await.unwrap(), 0);

    tx.rollback().await.unwrap();
    assert_eq!(recorder.max_tracking_id(&upstream).await.unwrap(), 0);
    assert!(recorder.select_events(id, &EventQuery::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn ledger_transaction_commits_every_batch() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let recorder = db.store.process_recorder(unique("follower"));
    let upstream = unique("upstream");
    let id = Uuid::new_v4();

    let mut tx = recorder.begin().await.unwrap();
    for version in 1..=3 {
        tx.insert_events_with_tracking(
            &[event(id, version)],
            Some(&Tracking::new(upstream.as_str(), version)),
        )
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();

    assert_eq!(recorder.max_tracking_id(&upstream).await.unwrap(), 3);
    assert_eq!(
        recorder.select_events(id, &EventQuery::new()).await.unwrap().len(),
        3
    );
}
