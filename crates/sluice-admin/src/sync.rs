// ABOUTME: Catches followers up with their leaders by pulling unseen notifications through a policy.
// ABOUTME: Each processed notification is written with its tracking row, so a rerun resumes cleanly.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sluice_core::{
    LedgerTransaction, Notification, NotificationFeed, NotificationQuery, StoredEvent, Tracking,
    TrackingLedger,
};

use crate::error::{AdminError, SyncError};

/// A downstream application: its recorder plus the policy that turns a
/// leader's notification into new events of its own.
#[async_trait]
pub trait Follower: Send + Sync {
    fn name(&self) -> &str;

    fn recorder(&self) -> &dyn TrackingLedger;

    /// Decide which events to record in response to `notification`.
    ///
    /// An `Err` carries the reason the policy refused the notification.
    async fn process(
        &self,
        leader: &str,
        notification: &Notification,
    ) -> Result<Vec<StoredEvent>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: 100,
        }
    }
}

/// Followers, the leaders each one follows, and the feeds of those leaders.
#[derive(Default)]
pub struct System {
    followers: Vec<(Arc<dyn Follower>, Vec<String>)>,
    feeds: BTreeMap<String, Arc<dyn NotificationFeed>>,
}

impl System {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leader's feed under its application name.
    pub fn leader(mut self, feed: Arc<dyn NotificationFeed>) -> Self {
        self.feeds.insert(feed.application_name().to_string(), feed);
        self
    }

    /// Register a follower and the leaders it follows, in pull order.
    pub fn follower<I, S>(mut self, follower: Arc<dyn Follower>, leaders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let leaders = leaders.into_iter().map(Into::into).collect();
        self.followers.push((follower, leaders));
        self
    }

    /// Follower names in registration order.
    pub fn follower_names(&self) -> Vec<String> {
        self.followers
            .iter()
            .map(|(follower, _)| follower.name().to_string())
            .collect()
    }

    fn find(&self, name: &str) -> Option<&(Arc<dyn Follower>, Vec<String>)> {
        self.followers
            .iter()
            .find(|(follower, _)| follower.name() == name)
    }
}

/// Outcome for one follower within a run.
#[derive(Debug)]
pub struct FollowerOutcome {
    pub follower: String,
    /// Per leader, in pull order, the number of notifications processed.
    pub result: Result<Vec<(String, u64)>, SyncError>,
}

#[derive(Debug)]
pub struct SyncReport {
    pub complete_selection: bool,
    pub dry_run: bool,
    pub outcomes: Vec<FollowerOutcome>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.result.is_err())
    }
}

/// Resolve a requested follower selection.
///
/// An empty request selects everything. Returns the selection and whether
/// it covers every known follower.
pub fn select_followers(
    all: &[String],
    requested: &[String],
) -> Result<(Vec<String>, bool), AdminError> {
    if requested.is_empty() {
        return Ok((all.to_vec(), true));
    }

    let mut unknown: Vec<String> = requested
        .iter()
        .filter(|name| !all.contains(name))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        unknown.dedup();
        return Err(AdminError::UnknownFollowers {
            unknown,
            known: all.to_vec(),
        });
    }

    let mut selection = Vec::with_capacity(requested.len());
    for name in requested {
        if !selection.contains(name) {
            selection.push(name.clone());
        }
    }
    let complete = selection.len() == all.len();
    Ok((selection, complete))
}

/// Pull every notification the follower has not yet tracked from each
/// leader, run it through the follower's policy, and record the result.
///
/// Pulling stops at each leader's maximum id as sampled when that leader's
/// turn starts. Notifications already tracked are skipped. A dry run writes
/// everything inside one ledger transaction and rolls it back at the end, so
/// it fails wherever a real run would.
#[tracing::instrument(skip_all, fields(follower = follower.name(), dry_run = options.dry_run))]
pub async fn sync_follower_with_leaders(
    follower: &dyn Follower,
    leaders: &[(String, Arc<dyn NotificationFeed>)],
    options: &SyncOptions,
) -> Result<Vec<(String, u64)>, SyncError> {
    let recorder = follower.recorder();
    let batch_size = options.batch_size.max(1);
    let mut counts = Vec::with_capacity(leaders.len());
    let mut dry_run = if options.dry_run {
        Some(recorder.begin().await?)
    } else {
        None
    };

    for (leader, feed) in leaders {
        let mut processed = 0u64;
        let mut last_seen = recorder.max_tracking_id(leader).await?;
        let stop = feed.max_notification_id().await?;

        while last_seen < stop {
            let query = NotificationQuery::after(last_seen, batch_size).stop(stop);
            let batch = feed.select_notifications(&query).await?;
            let Some(last) = batch.last() else {
                break;
            };
            let next = last.id;

            for notification in &batch {
                if recorder.has_tracking_id(leader, notification.id).await? {
                    continue;
                }
                let events = follower
                    .process(leader, notification)
                    .await
                    .map_err(|message| SyncError::Rejected {
                        follower: follower.name().to_string(),
                        leader: leader.clone(),
                        notification_id: notification.id,
                        message,
                    })?;
                let tracking = Tracking::new(leader.as_str(), notification.id);
                match dry_run.as_mut() {
                    Some(tx) => tx.insert_events_with_tracking(&events, Some(&tracking)).await?,
                    None => {
                        recorder
                            .insert_events_with_tracking(&events, Some(&tracking))
                            .await?
                    }
                };
                processed += 1;
            }
            last_seen = next;
        }

        tracing::debug!(leader = %leader, processed, "leader done");
        counts.push((leader.clone(), processed));
    }

    if let Some(tx) = dry_run {
        tx.rollback().await?;
    }
    Ok(counts)
}

/// Synchronize the requested followers (all when empty).
///
/// A follower that fails with an expected error is reported and the run
/// moves on to the next one; any other error aborts the run.
pub async fn sync_followers(
    system: &System,
    requested: &[String],
    options: &SyncOptions,
) -> Result<SyncReport, AdminError> {
    let (selection, complete_selection) = select_followers(&system.follower_names(), requested)?;
    tracing::info!(
        followers = selection.len(),
        dry_run = options.dry_run,
        "synchronizing followers"
    );

    let mut outcomes = Vec::with_capacity(selection.len());
    for name in selection {
        let Some((follower, leader_names)) = system.find(&name) else {
            continue;
        };

        let mut leaders = Vec::with_capacity(leader_names.len());
        for leader in leader_names {
            let Some(feed) = system.feeds.get(leader) else {
                return Err(AdminError::SyncAborted {
                    follower: name,
                    source: SyncError::UnknownLeader {
                        follower: follower.name().to_string(),
                        leader: leader.clone(),
                    },
                });
            };
            leaders.push((leader.clone(), Arc::clone(feed)));
        }

        match sync_follower_with_leaders(follower.as_ref(), &leaders, options).await {
            Ok(counts) => outcomes.push(FollowerOutcome {
                follower: name,
                result: Ok(counts),
            }),
            Err(err) if err.is_expected() => {
                tracing::warn!(follower = %name, "synchronization failed: {err}");
                outcomes.push(FollowerOutcome {
                    follower: name,
                    result: Err(err),
                });
            }
            Err(err) => {
                return Err(AdminError::SyncAborted {
                    follower: name,
                    source: err,
                });
            }
        }
    }

    Ok(SyncReport {
        complete_selection,
        dry_run: options.dry_run,
        outcomes,
    })
}
