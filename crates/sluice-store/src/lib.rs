// ABOUTME: Library root for sluice-store, the relational backends for sluice recorders.
// ABOUTME: Exposes configuration, schema DDL, SQLite and Postgres datastores, and the factory.

pub mod config;
pub mod factory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use config::{ConfigError, DatabaseUrl, StoreConfig};
pub use factory::Datastore;
#[cfg(feature = "postgres")]
pub use postgres::PgDatastore;
pub use sqlite::SqliteDatastore;
