// ABOUTME: Resets a follower's tracking watermarks so it re-processes its leaders' feeds.
// ABOUTME: Deletes run in one admin transaction, rolled back instead of committed on a dry run.

use std::collections::BTreeSet;

use sluice_core::{FollowerMap, TrackingAdmin};

use crate::error::AdminError;

/// What a reset removed, or would have removed on a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    pub follower: String,
    pub upstream_apps: Vec<String>,
    pub notifications_reset: u64,
    pub dry_run: bool,
}

/// Validate a reset request against the known followers.
///
/// An empty `requested` list selects every upstream app the follower
/// tracks. The result is sorted and free of duplicates.
pub fn select_upstream_apps(
    follower: &str,
    requested: &[String],
    followers: &FollowerMap,
) -> Result<Vec<String>, AdminError> {
    let Some(known) = followers.get(follower) else {
        return Err(AdminError::UnknownFollower {
            follower: follower.to_string(),
            known: followers.keys().cloned().collect(),
        });
    };

    let known: BTreeSet<&String> = known.iter().collect();
    let requested: BTreeSet<&String> = requested.iter().collect();
    let mut unknown: Vec<String> = requested
        .difference(&known)
        .map(|app| app.to_string())
        .collect();
    let known_list = || -> Vec<String> { known.iter().map(|app| app.to_string()).collect() };

    match unknown.len() {
        0 if requested.is_empty() => Ok(known_list()),
        0 => Ok(requested.iter().map(|app| app.to_string()).collect()),
        1 => Err(AdminError::UnknownUpstream {
            follower: follower.to_string(),
            upstream: unknown.remove(0),
            known: known_list(),
        }),
        _ => Err(AdminError::UnknownUpstreams {
            follower: follower.to_string(),
            upstreams: unknown,
            known: known_list(),
        }),
    }
}

/// Delete the follower's tracking rows for the selected upstream apps.
///
/// On a dry run the deletes are executed and counted, then rolled back.
#[tracing::instrument(skip(admin))]
pub async fn reset_follower(
    admin: &dyn TrackingAdmin,
    follower: &str,
    requested: &[String],
    dry_run: bool,
) -> Result<ResetReport, AdminError> {
    let followers = admin.list_followers().await?;
    let upstream_apps = select_upstream_apps(follower, requested, &followers)?;

    let mut tx = admin.begin().await?;
    let notifications_reset = tx.delete_tracking(follower, &upstream_apps).await?;
    if dry_run {
        tx.rollback().await?;
        tracing::info!(
            notifications_reset,
            "dry run: tracking reset of {} upstream apps rolled back",
            upstream_apps.len()
        );
    } else {
        tx.commit().await?;
        tracing::info!(
            notifications_reset,
            "reset tracking of {} upstream apps",
            upstream_apps.len()
        );
    }

    Ok(ResetReport {
        follower: follower.to_string(),
        upstream_apps,
        notifications_reset,
        dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{Tracking, TrackingLedger};
    use sluice_store::SqliteDatastore;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn followers() -> FollowerMap {
        FollowerMap::from([
            ("AnotherApplication".to_string(), names(&["upstream_app_2"])),
            (
                "Application".to_string(),
                names(&["upstream_app_1", "upstream_app_2"]),
            ),
        ])
    }

    async fn seeded() -> SqliteDatastore {
        let store = SqliteDatastore::open_in_memory().unwrap();
        let app = store.process_recorder("Application");
        for (upstream, id) in [("upstream_app_1", 1), ("upstream_app_2", 1), ("upstream_app_2", 2)] {
            app.insert_events_with_tracking(&[], Some(&Tracking::new(upstream, id)))
                .await
                .unwrap();
        }
        store
            .process_recorder("AnotherApplication")
            .insert_events_with_tracking(&[], Some(&Tracking::new("upstream_app_2", 2)))
            .await
            .unwrap();
        store
    }

    #[test]
    fn empty_request_selects_all_upstreams() {
        let selected = select_upstream_apps("Application", &[], &followers()).unwrap();
        assert_eq!(selected, names(&["upstream_app_1", "upstream_app_2"]));
    }

    #[test]
    fn request_is_sorted_and_deduplicated() {
        let requested = names(&["upstream_app_2", "upstream_app_1", "upstream_app_2"]);
        let selected = select_upstream_apps("Application", &requested, &followers()).unwrap();
        assert_eq!(selected, names(&["upstream_app_1", "upstream_app_2"]));
    }

    #[test]
    fn unknown_follower_is_rejected() {
        let err = select_upstream_apps("Nobody", &[], &followers()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown follower: Nobody. The known followers are: AnotherApplication, Application."
        );
    }

    #[test]
    fn unknown_upstreams_are_rejected() {
        let err = select_upstream_apps(
            "AnotherApplication",
            &names(&["upstream_app_1"]),
            &followers(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "AnotherApplication does not (currently) track upstream_app_1. \
             Its known upstream apps are: upstream_app_2."
        );

        let err = select_upstream_apps(
            "Application",
            &names(&["zeta", "upstream_app_1", "alpha"]),
            &followers(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Application does not (currently) track: alpha, zeta. \
             Its known upstream apps are: upstream_app_1, upstream_app_2."
        );
    }

    #[tokio::test]
    async fn reset_removes_selected_watermarks() {
        let store = seeded().await;
        let admin = store.tracking_admin();

        let report = reset_follower(&admin, "Application", &names(&["upstream_app_2"]), false)
            .await
            .unwrap();
        assert_eq!(report.upstream_apps, names(&["upstream_app_2"]));
        assert_eq!(report.notifications_reset, 2);
        assert!(!report.dry_run);

        let app = store.process_recorder("Application");
        assert_eq!(app.max_tracking_id("upstream_app_1").await.unwrap(), 1);
        assert_eq!(app.max_tracking_id("upstream_app_2").await.unwrap(), 0);
        let other = store.process_recorder("AnotherApplication");
        assert_eq!(other.max_tracking_id("upstream_app_2").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dry_run_counts_but_keeps_watermarks() {
        let store = seeded().await;
        let admin = store.tracking_admin();

        let report = reset_follower(&admin, "Application", &[], true).await.unwrap();
        assert_eq!(report.upstream_apps, names(&["upstream_app_1", "upstream_app_2"]));
        assert_eq!(report.notifications_reset, 3);
        assert!(report.dry_run);

        let followers = admin.list_followers().await.unwrap();
        assert_eq!(
            followers["Application"],
            names(&["upstream_app_1", "upstream_app_2"])
        );
    }

    #[tokio::test]
    async fn full_reset_forgets_the_follower() {
        let store = seeded().await;
        let admin = store.tracking_admin();

        reset_follower(&admin, "Application", &[], false)
            .await
            .unwrap();

        let followers = admin.list_followers().await.unwrap();
        assert!(!followers.contains_key("Application"));
        let err = reset_follower(&admin, "Application", &[], false)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::UnknownFollower { .. }));
    }
}
