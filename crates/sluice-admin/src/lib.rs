// ABOUTME: Library root for sluice-admin, the operator tooling over sluice recorders.
// ABOUTME: Exposes follower reset, follower synchronization, and their operator messages.

pub mod error;
pub mod messages;
pub mod reset;
pub mod sync;

pub use error::{AdminError, SyncError};
pub use messages::Rendered;
pub use reset::{ResetReport, reset_follower, select_upstream_apps};
pub use sync::{
    Follower, FollowerOutcome, SyncOptions, SyncReport, System, select_followers,
    sync_follower_with_leaders, sync_followers,
};
