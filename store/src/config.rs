//! Configuration management for persisted collections.

use crate::driver::DriverKind;
use std::env;
use std::path::PathBuf;

/// Default store name, shared by every persisted collection of an app.
pub const DEFAULT_STORE_NAME: &str = "persisted_collections";

/// Storage configuration, loaded from environment variables or built in code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistConfig {
    /// Driver preference list; the first one that opens is used
    pub drivers: Vec<DriverKind>,
    /// Explicit SQLite URL for the database driver
    pub database_url: Option<String>,
    /// Directory for the indexed driver (and the default database file)
    pub data_dir: Option<PathBuf>,
    /// Name of the store holding every collection namespace
    pub store_name: String,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            drivers: DriverKind::ALL.to_vec(),
            database_url: None,
            data_dir: None,
            store_name: DEFAULT_STORE_NAME.to_string(),
        }
    }
}

impl PersistConfig {
    /// Load configuration from environment variables (and `.env`, if any).
    ///
    /// - `PERSIST_DRIVERS`: comma-separated preference list
    /// - `PERSIST_DATABASE_URL`: SQLite URL for the database driver
    /// - `PERSIST_DATA_DIR`: directory for on-disk drivers
    /// - `PERSIST_STORE_NAME`: store name
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let drivers = match env::var("PERSIST_DRIVERS") {
            Ok(list) => parse_drivers(&list)?,
            Err(_) => DriverKind::ALL.to_vec(),
        };

        let database_url = env::var("PERSIST_DATABASE_URL").ok();
        let data_dir = env::var("PERSIST_DATA_DIR").ok().map(PathBuf::from);
        let store_name =
            env::var("PERSIST_STORE_NAME").unwrap_or_else(|_| DEFAULT_STORE_NAME.to_string());

        Ok(Self {
            drivers,
            database_url,
            data_dir,
            store_name,
        })
    }

    pub fn with_drivers(mut self, drivers: impl Into<Vec<DriverKind>>) -> Self {
        self.drivers = drivers.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = name.into();
        self
    }

    /// URL for the database driver: the explicit one, else a file named
    /// after the store inside the data directory.
    pub fn resolved_database_url(&self) -> Option<String> {
        self.database_url.clone().or_else(|| {
            self.data_dir.as_ref().map(|dir| {
                format!(
                    "sqlite://{}",
                    dir.join(format!("{}.db", self.store_name)).display()
                )
            })
        })
    }

    /// Directory for the indexed driver.
    pub fn indexed_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(&self.store_name))
    }
}

/// Parse a comma-separated driver list such as `"database, keyvalue"`.
pub fn parse_drivers(list: &str) -> Result<Vec<DriverKind>, ConfigError> {
    let drivers = list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse()
                .map_err(|_| ConfigError::UnknownDriver(name.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if drivers.is_empty() {
        return Err(ConfigError::EmptyDriverList);
    }
    Ok(drivers)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown storage driver: {0}")]
    UnknownDriver(String),

    #[error("PERSIST_DRIVERS must name at least one driver")]
    EmptyDriverList,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_prefer_database_first() {
        let config = PersistConfig::default();
        assert_eq!(
            config.drivers,
            vec![DriverKind::Database, DriverKind::Indexed, DriverKind::KeyValue]
        );
        assert_eq!(config.store_name, "persisted_collections");
        assert_eq!(config.resolved_database_url(), None);
        assert_eq!(config.indexed_dir(), None);
    }

    #[test]
    fn parses_driver_lists() {
        assert_eq!(
            parse_drivers("keyvalue, database").unwrap(),
            vec![DriverKind::KeyValue, DriverKind::Database]
        );
        assert_eq!(
            parse_drivers("indexeddb,localstorage").unwrap(),
            vec![DriverKind::Indexed, DriverKind::KeyValue]
        );
        assert_eq!(
            parse_drivers("database,floppy"),
            Err(ConfigError::UnknownDriver("floppy".into()))
        );
        assert_eq!(parse_drivers(" , "), Err(ConfigError::EmptyDriverList));
    }

    #[test]
    fn paths_derive_from_data_dir() {
        let config = PersistConfig::default()
            .with_data_dir("/var/lib/app")
            .with_store_name("offline");

        assert_eq!(
            config.resolved_database_url().as_deref(),
            Some("sqlite:///var/lib/app/offline.db")
        );
        assert_eq!(
            config.indexed_dir(),
            Some(PathBuf::from("/var/lib/app/offline"))
        );

        let explicit = config.with_database_url("sqlite::memory:");
        assert_eq!(
            explicit.resolved_database_url().as_deref(),
            Some("sqlite::memory:")
        );
    }
}
