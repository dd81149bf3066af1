//! File-backed driver: one JSON document per namespace.
//!
//! Each namespace lives in `<root>/<namespace>.json` as a single object
//! mapping ids to records or `false`. Writes go to a temporary file that is
//! then renamed over the original, so a crash never leaves a torn file.

use super::DurableStore;
use crate::{driver::DriverKind, error::Result};
use async_trait::async_trait;
use dashmap::DashMap;
use persist_engine::{DocId, StoredValue};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Namespaced store persisting to JSON files under a directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles per namespace
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileStore {
    /// Open (creating if needed) the store directory.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "File store opened");
        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(namespace.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(namespace)))
    }

    async fn load(&self, namespace: &str) -> Result<BTreeMap<DocId, StoredValue>> {
        let text = match tokio::fs::read_to_string(self.path_for(namespace)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let raw: Map<String, Value> = serde_json::from_str(&text)?;
        raw.into_iter()
            .map(|(id, value)| -> Result<(DocId, StoredValue)> {
                let decoded = StoredValue::decode(&id, value)?;
                Ok((id, decoded))
            })
            .collect()
    }

    async fn save(&self, namespace: &str, entries: BTreeMap<DocId, StoredValue>) -> Result<()> {
        let path = self.path_for(namespace);
        if entries.is_empty() {
            return match tokio::fs::remove_file(&path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        let raw: Map<String, Value> = entries
            .into_iter()
            .map(|(id, value)| (id, Value::from(value)))
            .collect();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&raw)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Run a read-modify-write cycle on one namespace.
    async fn modify<F>(&self, namespace: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<DocId, StoredValue>) + Send,
    {
        let lock = self.lock_for(namespace);
        let _guard = lock.lock().await;
        let mut entries = self.load(namespace).await?;
        change(&mut entries);
        self.save(namespace, entries).await
    }
}

/// Map a namespace name to a safe file stem. Characters outside
/// `[A-Za-z0-9_-]` are hex-escaped as `%XX`.
fn file_stem(namespace: &str) -> String {
    let mut stem = String::with_capacity(namespace.len());
    for byte in namespace.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' => stem.push(byte as char),
            other => stem.push_str(&format!("%{other:02X}")),
        }
    }
    stem
}

#[async_trait]
impl DurableStore for FileStore {
    fn kind(&self) -> DriverKind {
        DriverKind::Indexed
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<StoredValue>> {
        Ok(self.load(namespace).await?.remove(id))
    }

    async fn get_many(
        &self,
        namespace: &str,
        ids: &[DocId],
    ) -> Result<BTreeMap<DocId, StoredValue>> {
        let mut entries = self.load(namespace).await?;
        Ok(ids
            .iter()
            .filter_map(|id| entries.remove(id).map(|value| (id.clone(), value)))
            .collect())
    }

    async fn get_all(&self, namespace: &str) -> Result<BTreeMap<DocId, StoredValue>> {
        self.load(namespace).await
    }

    async fn set(&self, namespace: &str, id: &str, value: StoredValue) -> Result<()> {
        self.modify(namespace, |entries| {
            entries.insert(id.to_string(), value);
        })
        .await
    }

    async fn set_many(
        &self,
        namespace: &str,
        batch: BTreeMap<DocId, StoredValue>,
    ) -> Result<()> {
        self.modify(namespace, |entries| entries.extend(batch)).await
    }

    async fn remove(&self, namespace: &str, id: &str) -> Result<()> {
        self.modify(namespace, |entries| {
            entries.remove(id);
        })
        .await
    }

    async fn remove_many(&self, namespace: &str, ids: &[DocId]) -> Result<()> {
        self.modify(namespace, |entries| {
            for id in ids {
                entries.remove(id);
            }
        })
        .await
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        self.modify(namespace, |entries| entries.clear()).await
    }
}
