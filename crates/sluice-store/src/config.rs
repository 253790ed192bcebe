// ABOUTME: Configuration loading and validation for sluice datastores.
// ABOUTME: Reads SLUICE_* environment variables and parses the database URL into a backend choice.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SLUICE_DATABASE_URL has an unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("SLUICE_DATABASE_URL is empty")]
    EmptyDatabaseUrl,

    #[error("{name} is not a valid number: {value}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Where the records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// A private in-process SQLite database.
    SqliteMemory,
    SqliteFile(PathBuf),
    Postgres(String),
}

impl DatabaseUrl {
    /// Parse `sqlite::memory:`, `sqlite://<path>`, `postgres://...`,
    /// `postgresql://...`, `:memory:`, or a bare filesystem path.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }

        if raw == ":memory:" || raw == "sqlite::memory:" || raw == "sqlite://:memory:" {
            return Ok(Self::SqliteMemory);
        }
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            return Ok(Self::Postgres(raw.to_string()));
        }
        if let Some(path) = raw.strip_prefix("sqlite://") {
            return Ok(Self::SqliteFile(PathBuf::from(path)));
        }
        if let Some(path) = raw.strip_prefix("sqlite:") {
            return Ok(Self::SqliteFile(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = raw.split_once("://") {
            return Err(ConfigError::UnsupportedScheme(scheme.to_string()));
        }

        Ok(Self::SqliteFile(PathBuf::from(raw)))
    }
}

/// Datastore configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database: DatabaseUrl,
    pub create_tables: bool,
    pub sqlite_busy_timeout: Duration,
    pub pg_max_connections: u32,
}

impl StoreConfig {
    /// Configuration for the given database with defaults for everything else.
    pub fn new(database: DatabaseUrl) -> Self {
        Self {
            database,
            create_tables: true,
            sqlite_busy_timeout: Duration::from_millis(5000),
            pg_max_connections: 10,
        }
    }

    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - SLUICE_DATABASE_URL: database location (default: sqlite://sluice.db)
    /// - SLUICE_CREATE_TABLES: create missing tables on open (default: true)
    /// - SLUICE_SQLITE_BUSY_TIMEOUT_MS: SQLite busy timeout (default: 5000)
    /// - SLUICE_PG_MAX_CONNECTIONS: Postgres pool size (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("SLUICE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://sluice.db".to_string());
        let database = DatabaseUrl::parse(&url)?;

        let create_tables = std::env::var("SLUICE_CREATE_TABLES")
            .map(|v| v == "true" || v == "1" || v == "yes")
            .unwrap_or(true);

        let busy_ms = parse_number("SLUICE_SQLITE_BUSY_TIMEOUT_MS", 5000u64)?;
        let pg_max_connections = parse_number("SLUICE_PG_MAX_CONNECTIONS", 10u32)?;

        Ok(Self {
            database,
            create_tables,
            sqlite_busy_timeout: Duration::from_millis(busy_ms),
            pg_max_connections,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        _ => Ok(default),
    }
}
