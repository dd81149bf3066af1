//! The persisted collection facade.
//!
//! Ties a live [`DocumentSet`] to a durable [`Namespace`]: persisters mirror
//! live changes into storage, and [`PersistedCollection::sync`] merges
//! durable state back, reporting what changed while disconnected.

use crate::{
    config::PersistConfig,
    connectivity::Connectivity,
    driver::open_store,
    durable::{DurableStore, Namespace},
    error::{Result, StoreError},
    persister::{MirrorQueue, Persister, PersisterId, Persisters},
    sync_state::SyncState,
};
use futures::future::join_all;
use parking_lot::Mutex;
use persist_engine::{
    ChangeEvent, ChangeOrigin, DocId, Document, DocumentSet, Error as EngineError, Fields, FindOptions,
    IdSelector, MirrorOp, Reconciler, Selector, StoredValue, SyncDiff,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A live document set shared between a collection and its observers.
pub type SharedDocuments = Arc<Mutex<DocumentSet>>;

/// Result of [`PersistedCollection::get_persisted`].
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    /// The stored value for a single id, if any
    One(Option<Value>),
    /// Stored values by id; missing ids are absent
    Many(BTreeMap<DocId, Value>),
}

/// A live collection with write-through persistence and offline sync.
pub struct PersistedCollection {
    name: String,
    docs: SharedDocuments,
    store: Arc<dyn DurableStore>,
    namespace: Namespace,
    connectivity: Arc<dyn Connectivity>,
    common: Arc<AtomicBool>,
    sync_state: SyncState,
    persisters: Persisters,
}

impl std::fmt::Debug for PersistedCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedCollection")
            .field("name", &self.name)
            .field("driver", &self.store.kind())
            .field("common", &self.is_common())
            .field("syncing", &self.is_syncing())
            .field("persisters", &self.persisters.len())
            .finish()
    }
}

impl PersistedCollection {
    /// Create a collection with an empty live document set.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn DurableStore>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self::with_documents(name, store, connectivity, SharedDocuments::default())
    }

    /// Create a collection over an existing live document set.
    pub fn with_documents(
        name: impl Into<String>,
        store: Arc<dyn DurableStore>,
        connectivity: Arc<dyn Connectivity>,
        docs: SharedDocuments,
    ) -> Self {
        let name = name.into();
        let namespace = Namespace::new(store.clone(), name.clone());
        Self {
            name,
            docs,
            store,
            namespace,
            connectivity,
            common: Arc::new(AtomicBool::new(false)),
            sync_state: SyncState::new(),
            persisters: Persisters::default(),
        }
    }

    /// Open the configured storage driver and create a collection on it.
    pub async fn open(
        name: impl Into<String>,
        config: &PersistConfig,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self> {
        let store = open_store(config).await?;
        Ok(Self::new(name, store, connectivity))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection's own durable namespace.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The shared live document set.
    pub fn docs(&self) -> SharedDocuments {
        self.docs.clone()
    }

    /// Enable or disable offline tagging and tombstones.
    pub fn set_common(&self, common: bool) {
        self.common.store(common, Ordering::SeqCst);
        debug!(collection = %self.name, common, "Common mode set");
    }

    pub fn is_common(&self) -> bool {
        self.common.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_state.is_syncing()
    }

    /// Subscribe to the `isSyncing` flag.
    pub fn syncing(&self) -> watch::Receiver<bool> {
        self.sync_state.subscribe()
    }

    // ---------------------------------------------------------------------
    // Durable pass-throughs
    // ---------------------------------------------------------------------

    /// Write records (or tombstones, as `false`) straight to durable storage.
    ///
    /// The key is the id: a record's `_id` field is dropped, and one that
    /// names a different id rejects the whole call before anything is written.
    pub async fn set_persisted(&self, data: BTreeMap<DocId, Value>) -> Result<()> {
        let entries = data
            .into_iter()
            .map(|(id, value)| -> Result<(DocId, StoredValue)> {
                let stored = StoredValue::for_key(&id, value)?;
                Ok((id, stored))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        self.namespace.set_many(entries).await
    }

    /// Read stored values by id, by ids, or the whole namespace.
    pub async fn get_persisted(&self, ids: IdSelector) -> Result<Persisted> {
        let stored = match ids {
            IdSelector::One(id) => {
                let value = self.namespace.get(&id).await?;
                return Ok(Persisted::One(value.map(Value::from)));
            }
            IdSelector::Many(ids) => self.namespace.get_many(&ids).await?,
            IdSelector::All => self.namespace.get_all().await?,
        };

        Ok(Persisted::Many(
            stored
                .into_iter()
                .map(|(id, value)| (id, Value::from(value)))
                .collect(),
        ))
    }

    /// Delete stored values by id or ids. Clearing everything goes through
    /// [`clear_persisted`](Self::clear_persisted).
    pub async fn remove_persisted(&self, ids: IdSelector) -> Result<()> {
        match ids {
            IdSelector::One(id) => self.namespace.remove(&id).await,
            IdSelector::Many(ids) => self.namespace.remove_many(&ids).await,
            IdSelector::All => Err(EngineError::InvalidArgument(
                "remove_persisted requires an id or a list of ids".to_string(),
            )
            .into()),
        }
    }

    pub async fn clear_persisted(&self) -> Result<()> {
        self.namespace.clear().await
    }

    // ---------------------------------------------------------------------
    // Sync
    // ---------------------------------------------------------------------

    /// Merge the durable namespace back into the live set.
    ///
    /// Pending mirror writes are flushed first. Tombstones are consumed and
    /// flagged records are rewritten without their flags, so an immediate
    /// second pass reports an empty diff. A pass that fails midway leaves
    /// whatever it already merged in place.
    pub async fn sync(&self) -> Result<SyncDiff> {
        let Some(_guard) = self.sync_state.begin() else {
            return Err(StoreError::SyncInProgress(self.name.clone()));
        };
        debug!(collection = %self.name, "Sync started");

        self.flush_persisters().await;
        let entries = self.namespace.get_all().await?;
        let plan = Reconciler::new(self.is_common()).plan(entries);

        for id in &plan.ignored {
            warn!(collection = %self.name, id = %id, "Skipping tombstone outside common mode");
        }

        let merged = plan.merge.len();
        let recomputed = {
            let mut docs = self.docs.lock();
            let mut batch = docs.begin_merge();
            for doc in plan.merge {
                batch.upsert(doc);
            }
            for id in &plan.tombstones {
                batch.remove(id);
            }
            batch.commit()
        };

        let cleaned = plan
            .write_back
            .into_iter()
            .map(|(id, fields)| (id, StoredValue::Record(fields)))
            .collect();
        self.namespace.set_many(cleaned).await?;
        self.namespace.remove_many(&plan.tombstones).await?;

        let diff = plan.diff;
        info!(
            collection = %self.name,
            inserted = diff.inserted.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            merged,
            queries = recomputed,
            "Sync finished"
        );
        Ok(diff)
    }

    // ---------------------------------------------------------------------
    // Persisters
    // ---------------------------------------------------------------------

    /// Mirror every change of a live query into this collection's namespace.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach_persister(&self, selector: Selector, options: FindOptions) -> PersisterId {
        self.attach_persister_as(self.name.clone(), selector, options)
    }

    /// Like [`attach_persister`](Self::attach_persister), but mirror into
    /// the namespace of another logical collection.
    pub fn attach_persister_as(
        &self,
        namespace: impl Into<String>,
        selector: Selector,
        options: FindOptions,
    ) -> PersisterId {
        let id = self.persisters.next_id();
        let namespace = Namespace::new(self.store.clone(), namespace);
        let (queue, worker) = MirrorQueue::spawn(id, namespace.clone());
        // Sync writes the merged state back to the source namespace itself.
        let mirrors_source = namespace.name() == self.name;

        let observer = {
            let queue = queue.clone();
            let connectivity = self.connectivity.clone();
            let common = self.common.clone();
            move |event: ChangeEvent| {
                if mirrors_source && event.origin == ChangeOrigin::Merge {
                    return;
                }
                let connected = connectivity.is_connected();
                queue.push(MirrorOp::from_event(
                    event,
                    connected,
                    common.load(Ordering::SeqCst),
                ));
            }
        };

        let query_id = self.docs.lock().observe(selector, options, observer);
        info!(
            collection = %self.name,
            persister = %id,
            namespace = %namespace.name(),
            "Persister attached"
        );
        self.persisters.register(
            id,
            Persister {
                query_id,
                namespace,
                queue,
                worker,
            },
        );
        id
    }

    /// Stop mirroring for the selected persisters.
    ///
    /// Writes already queued still complete, and the next
    /// [`flush_persisters`](Self::flush_persisters) waits for them. Unknown
    /// ids are ignored. Returns the number of persisters detached.
    pub fn detach_persister(&self, ids: IdSelector<PersisterId>) -> usize {
        let mut detached = 0;
        for id in self.persisters.select(ids) {
            let Some(query_id) = self.persisters.remove(id) else {
                debug!(collection = %self.name, persister = %id, "No such persister");
                continue;
            };
            self.docs.lock().stop(query_id);
            info!(collection = %self.name, persister = %id, "Persister detached");
            detached += 1;
        }
        detached
    }

    /// Ids of the attached persisters, in attach order.
    pub fn persister_ids(&self) -> Vec<PersisterId> {
        self.persisters.ids()
    }

    /// Namespace a persister mirrors into.
    pub fn persister_namespace(&self, id: PersisterId) -> Option<String> {
        self.persisters.namespace_of(id)
    }

    /// Wait until every mirror write queued so far has been applied,
    /// including writes of persisters detached since the last flush.
    pub async fn flush_persisters(&self) {
        let queues = self.persisters.queues();
        join_all(queues.iter().map(|queue| queue.flush())).await;
        self.persisters.drain().await;
    }

    // ---------------------------------------------------------------------
    // Live set pass-throughs
    // ---------------------------------------------------------------------

    /// Insert a document given as JSON; returns its id.
    pub fn insert(&self, value: Value) -> Result<DocId> {
        Ok(self.docs.lock().insert_value(value)?)
    }

    /// Replace a document's fields.
    pub fn update(&self, id: &str, fields: Fields) -> Result<()> {
        Ok(self.docs.lock().update(id, fields)?)
    }

    pub fn remove(&self, id: &str) -> Result<Document> {
        Ok(self.docs.lock().remove(id)?)
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.docs.lock().get(id).cloned()
    }

    pub fn find(&self, selector: &Selector, options: &FindOptions) -> Vec<Document> {
        self.docs.lock().find(selector, options)
    }
}

impl Drop for PersistedCollection {
    fn drop(&mut self) {
        // No persister outlives its collection.
        let detached = self.detach_persister(IdSelector::All);
        if detached > 0 {
            debug!(collection = %self.name, detached, "Collection dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connectivity::ConnectionStatus, durable::MemoryStore};
    use serde_json::json;

    fn collection() -> (PersistedCollection, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let coll = PersistedCollection::new(
            "todos",
            store.clone(),
            Arc::new(ConnectionStatus::default()),
        );
        (coll, store)
    }

    #[tokio::test]
    async fn persisted_round_trip() {
        let (coll, _) = collection();
        coll.set_persisted([("a".to_string(), json!({"x": 1}))].into())
            .await
            .unwrap();

        assert_eq!(
            coll.get_persisted("a".into()).await.unwrap(),
            Persisted::One(Some(json!({"x": 1})))
        );
        assert_eq!(
            coll.get_persisted(IdSelector::All).await.unwrap(),
            Persisted::Many([("a".to_string(), json!({"x": 1}))].into())
        );

        coll.remove_persisted("a".into()).await.unwrap();
        assert_eq!(
            coll.get_persisted("a".into()).await.unwrap(),
            Persisted::One(None)
        );
    }

    #[tokio::test]
    async fn set_persisted_rejects_scalars() {
        let (coll, store) = collection();
        let err = coll
            .set_persisted([("a".to_string(), json!(5))].into())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Engine(EngineError::InvalidStoredValue { .. })
        ));
        assert_eq!(store.operation_count(), 0);
    }

    #[tokio::test]
    async fn set_persisted_keys_records_by_id() {
        let (coll, store) = collection();
        coll.set_persisted([("a".to_string(), json!({"_id": "a", "x": 1}))].into())
            .await
            .unwrap();

        assert_eq!(
            store.get("todos", "a").await.unwrap(),
            Some(StoredValue::Record(
                json!({"x": 1}).as_object().cloned().unwrap()
            ))
        );

        let before = store.operation_count();
        let err = coll
            .set_persisted(
                [
                    ("b".to_string(), json!({"y": 2})),
                    ("c".to_string(), json!({"_id": "zzz", "x": 1})),
                ]
                .into(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Engine(EngineError::InvalidStoredValue { ref id, .. }) if id == "c"
        ));
        assert_eq!(store.operation_count(), before);
    }

    #[tokio::test]
    async fn remove_all_is_rejected_without_a_store_call() {
        let (coll, store) = collection();
        let err = coll.remove_persisted(IdSelector::All).await.unwrap_err();

        assert!(err.is_invalid_argument());
        assert_eq!(store.operation_count(), 0);
    }

    #[tokio::test]
    async fn persisters_get_monotonic_ids() {
        let (coll, _) = collection();
        let a = coll.attach_persister(Selector::all(), FindOptions::default());
        let b = coll.attach_persister_as("archive", Selector::all(), FindOptions::default());

        assert!(a < b);
        assert_eq!(coll.persister_namespace(b).as_deref(), Some("archive"));
        assert_eq!(coll.docs().lock().query_count(), 2);

        assert_eq!(coll.detach_persister(IdSelector::All), 2);
        assert_eq!(coll.docs().lock().query_count(), 0);
        assert!(coll.persister_ids().is_empty());
    }

    #[tokio::test]
    async fn flush_waits_for_detached_persisters() {
        let (coll, store) = collection();
        let id = coll.attach_persister(Selector::all(), FindOptions::default());

        coll.insert(json!({"_id": "a", "n": 1})).unwrap();
        coll.detach_persister(id.into());
        coll.flush_persisters().await;

        assert!(store.get("todos", "a").await.unwrap().is_some());
    }
}
