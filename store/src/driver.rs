//! Storage driver selection.
//!
//! Drivers are tried in the configured preference order; the first one that
//! opens wins. A driver that cannot open is logged and skipped.

use crate::{
    config::PersistConfig,
    durable::{DurableStore, FileStore, MemoryStore, SqliteStore},
    error::{Result, StoreError},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Backend family of a durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// SQLite database
    Database,
    /// JSON files on disk, one per namespace
    Indexed,
    /// Process memory
    KeyValue,
}

impl DriverKind {
    /// Default preference order.
    pub const ALL: [DriverKind; 3] = [Self::Database, Self::Indexed, Self::KeyValue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Indexed => "indexed",
            Self::KeyValue => "keyvalue",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "database" | "sqlite" | "websql" => Ok(Self::Database),
            "indexed" | "indexeddb" | "file" => Ok(Self::Indexed),
            "keyvalue" | "localstorage" | "memory" => Ok(Self::KeyValue),
            other => Err(format!("unknown driver '{other}'")),
        }
    }
}

/// Open the first available driver from `config.drivers`.
pub async fn open_store(config: &PersistConfig) -> Result<Arc<dyn DurableStore>> {
    let mut skipped = Vec::new();

    for &kind in &config.drivers {
        match open_driver(kind, config).await {
            Ok(store) => {
                info!(driver = %kind, store = %config.store_name, "Storage driver selected");
                return Ok(store);
            }
            Err(e) => {
                warn!(driver = %kind, error = %e, "Storage driver unavailable, trying next");
                skipped.push(format!("{kind}: {e}"));
            }
        }
    }

    Err(StoreError::NoDriverAvailable(if skipped.is_empty() {
        "no drivers configured".to_string()
    } else {
        skipped.join("; ")
    }))
}

async fn open_driver(kind: DriverKind, config: &PersistConfig) -> Result<Arc<dyn DurableStore>> {
    match kind {
        DriverKind::Database => {
            let url = config.resolved_database_url().ok_or_else(|| {
                StoreError::StorageUnavailable("no database url or data dir configured".into())
            })?;
            Ok(Arc::new(SqliteStore::connect(&url).await?))
        }
        DriverKind::Indexed => {
            let dir = config.indexed_dir().ok_or_else(|| {
                StoreError::StorageUnavailable("no data dir configured".into())
            })?;
            Ok(Arc::new(FileStore::open(dir).await?))
        }
        DriverKind::KeyValue => Ok(Arc::new(MemoryStore::new())),
    }
}
