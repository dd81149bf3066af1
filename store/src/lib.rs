//! # Persist Store
//!
//! Durable write-through persistence and offline sync for live collections.
//!
//! A [`PersistedCollection`] wraps a live document set. Attached persisters
//! mirror every change of a live query into a durable namespace, tagging
//! edits made while disconnected. [`PersistedCollection::sync`] later merges
//! the namespace back into the live set and reports what was inserted,
//! updated and removed offline.
//!
//! ## Example
//!
//! ```rust,no_run
//! use persist_store::{ConnectionStatus, PersistConfig, PersistedCollection};
//! use persist_engine::{FindOptions, Selector};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let status = Arc::new(ConnectionStatus::new(false));
//! let todos = PersistedCollection::open("todos", &PersistConfig::from_env()?, status.clone()).await?;
//! todos.set_common(true);
//! todos.attach_persister(Selector::all(), FindOptions::default());
//!
//! todos.insert(json!({"name": "a"}))?;
//!
//! status.set_connected(true);
//! let diff = todos.sync().await?;
//! assert_eq!(diff.inserted.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod connectivity;
pub mod driver;
pub mod durable;
pub mod error;
pub mod persister;
pub mod sync_state;

pub use collection::{Persisted, PersistedCollection, SharedDocuments};
pub use config::{ConfigError, PersistConfig};
pub use connectivity::{ConnectionStatus, Connectivity};
pub use driver::{open_store, DriverKind};
pub use durable::{DurableStore, FileStore, MemoryStore, Namespace, SqliteStore};
pub use error::{Result, StoreError};
pub use persister::PersisterId;
pub use sync_state::{SyncGuard, SyncState};
