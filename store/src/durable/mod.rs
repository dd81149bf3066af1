//! Durable key-value storage.
//!
//! Every driver stores `id -> record-or-tombstone` entries grouped into
//! named namespaces, one namespace per persisted collection. Drivers hold no
//! sync logic; failures are returned to the caller and never retried here.

mod file;
mod memory;
mod sqlite;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{driver::DriverKind, error::Result};
use async_trait::async_trait;
use persist_engine::{DocId, StoredValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Asynchronous key-value store partitioned into namespaces.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> DriverKind;

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<StoredValue>>;

    async fn get_all(&self, namespace: &str) -> Result<BTreeMap<DocId, StoredValue>>;

    async fn set(&self, namespace: &str, id: &str, value: StoredValue) -> Result<()>;

    async fn remove(&self, namespace: &str, id: &str) -> Result<()>;

    async fn clear(&self, namespace: &str) -> Result<()>;

    /// Fetch several ids; missing ids are absent from the result.
    async fn get_many(
        &self,
        namespace: &str,
        ids: &[DocId],
    ) -> Result<BTreeMap<DocId, StoredValue>> {
        let mut found = BTreeMap::new();
        for id in ids {
            if let Some(value) = self.get(namespace, id).await? {
                found.insert(id.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set_many(
        &self,
        namespace: &str,
        entries: BTreeMap<DocId, StoredValue>,
    ) -> Result<()> {
        for (id, value) in entries {
            self.set(namespace, &id, value).await?;
        }
        Ok(())
    }

    async fn remove_many(&self, namespace: &str, ids: &[DocId]) -> Result<()> {
        for id in ids {
            self.remove(namespace, id).await?;
        }
        Ok(())
    }
}

/// A durable store scoped to one namespace.
#[derive(Clone)]
pub struct Namespace {
    store: Arc<dyn DurableStore>,
    name: String,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("driver", &self.store.kind())
            .field("name", &self.name)
            .finish()
    }
}

impl Namespace {
    pub fn new(store: Arc<dyn DurableStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DriverKind {
        self.store.kind()
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredValue>> {
        self.store.get(&self.name, id).await
    }

    pub async fn get_many(&self, ids: &[DocId]) -> Result<BTreeMap<DocId, StoredValue>> {
        self.store.get_many(&self.name, ids).await
    }

    pub async fn get_all(&self) -> Result<BTreeMap<DocId, StoredValue>> {
        self.store.get_all(&self.name).await
    }

    pub async fn set(&self, id: &str, value: StoredValue) -> Result<()> {
        self.store.set(&self.name, id, value).await
    }

    pub async fn set_many(&self, entries: BTreeMap<DocId, StoredValue>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.store.set_many(&self.name, entries).await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.store.remove(&self.name, id).await
    }

    pub async fn remove_many(&self, ids: &[DocId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store.remove_many(&self.name, ids).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear(&self.name).await
    }
}

/// Encode a stored value as JSON text for drivers that persist strings.
pub(crate) fn encode(value: StoredValue) -> Result<String> {
    Ok(serde_json::to_string(&serde_json::Value::from(value))?)
}

/// Decode JSON text written by [`encode`].
pub(crate) fn decode(id: &str, text: &str) -> Result<StoredValue> {
    let value = serde_json::from_str(text)?;
    Ok(StoredValue::decode(id, value)?)
}
