//! In-memory key-value driver.
//!
//! Always available. Nothing survives the process, which makes it the
//! fallback of last resort and the driver used throughout the tests.

use super::DurableStore;
use crate::{
    driver::DriverKind,
    error::{Result, StoreError},
};
use async_trait::async_trait;
use dashmap::DashMap;
use persist_engine::{DocId, StoredValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Namespaced in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    namespaces: DashMap<String, BTreeMap<DocId, StoredValue>>,
    available: AtomicBool,
    operations: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
            available: AtomicBool::new(true),
            operations: AtomicUsize::new(0),
        }
    }

    /// Simulate the backing storage going away (or coming back).
    ///
    /// While unavailable every operation fails with
    /// [`StoreError::StorageUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of operations attempted against this store.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::StorageUnavailable(
                "in-memory store is offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn kind(&self) -> DriverKind {
        DriverKind::KeyValue
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<StoredValue>> {
        self.check()?;
        Ok(self
            .namespaces
            .get(namespace)
            .and_then(|entries| entries.get(id).cloned()))
    }

    async fn get_many(
        &self,
        namespace: &str,
        ids: &[DocId],
    ) -> Result<BTreeMap<DocId, StoredValue>> {
        self.check()?;
        let Some(entries) = self.namespaces.get(namespace) else {
            return Ok(BTreeMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| entries.get(id).map(|value| (id.clone(), value.clone())))
            .collect())
    }

    async fn get_all(&self, namespace: &str) -> Result<BTreeMap<DocId, StoredValue>> {
        self.check()?;
        Ok(self
            .namespaces
            .get(namespace)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }

    async fn set(&self, namespace: &str, id: &str, value: StoredValue) -> Result<()> {
        self.check()?;
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn set_many(
        &self,
        namespace: &str,
        entries: BTreeMap<DocId, StoredValue>,
    ) -> Result<()> {
        self.check()?;
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }

    async fn remove(&self, namespace: &str, id: &str) -> Result<()> {
        self.check()?;
        if let Some(mut entries) = self.namespaces.get_mut(namespace) {
            entries.remove(id);
        }
        Ok(())
    }

    async fn remove_many(&self, namespace: &str, ids: &[DocId]) -> Result<()> {
        self.check()?;
        if let Some(mut entries) = self.namespaces.get_mut(namespace) {
            for id in ids {
                entries.remove(id);
            }
        }
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        self.check()?;
        self.namespaces.remove(namespace);
        Ok(())
    }
}
