// ABOUTME: Core library for sluice, containing record types, errors, and recorder traits.
// ABOUTME: Storage backends and admin tooling build on the shapes defined here.

pub mod error;
pub mod record;
pub mod recorder;

pub use error::{ErrorKind, PersistenceError};
pub use record::{EventQuery, Notification, NotificationQuery, RecordKind, StoredEvent, Tracking};
pub use recorder::{
    AdminTransaction, AppendOnlyLog, FollowerMap, LedgerTransaction, NotificationFeed,
    TrackingAdmin, TrackingLedger,
};
