//! Persister registry and mirror workers.
//!
//! A persister is a live query whose change events are mirrored into a
//! durable namespace. The observer callback runs synchronously inside the
//! document set, so it only computes the [`MirrorOp`] and queues it; a
//! spawned worker per persister applies the queue in order.

use crate::{durable::Namespace, error::Result};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use persist_engine::{IdSelector, MirrorOp, QueryId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Identifier of an attached persister, unique within its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersisterId(pub u64);

impl fmt::Display for PersisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PersisterId> for IdSelector<PersisterId> {
    fn from(id: PersisterId) -> Self {
        IdSelector::One(id)
    }
}

/// Work item for a mirror worker.
#[derive(Debug)]
pub(crate) enum MirrorCommand {
    Apply(MirrorOp),
    /// Acknowledged once every earlier command has been applied
    Flush(oneshot::Sender<()>),
}

/// Sending half of a persister's queue.
#[derive(Debug, Clone)]
pub(crate) struct MirrorQueue {
    tx: mpsc::UnboundedSender<MirrorCommand>,
}

impl MirrorQueue {
    /// Spawn the worker for `namespace` and return its queue and task.
    ///
    /// Must be called from within a Tokio runtime. The worker exits once
    /// every clone of the queue has been dropped and the backlog is drained.
    pub(crate) fn spawn(id: PersisterId, namespace: Namespace) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(id, namespace, rx));
        (Self { tx }, worker)
    }

    /// Queue an op. Returns false if the worker is gone.
    pub(crate) fn push(&self, op: MirrorOp) -> bool {
        self.tx.send(MirrorCommand::Apply(op)).is_ok()
    }

    /// Wait until everything queued so far has been applied.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(MirrorCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_worker(
    id: PersisterId,
    namespace: Namespace,
    mut rx: mpsc::UnboundedReceiver<MirrorCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            MirrorCommand::Apply(op) => {
                let doc_id = op.id().clone();
                if let Err(e) = apply(&namespace, op).await {
                    // The in-memory mutation already happened; nothing to undo.
                    error!(
                        persister = %id,
                        namespace = %namespace.name(),
                        id = %doc_id,
                        error = %e,
                        "Mirror write failed"
                    );
                }
            }
            MirrorCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!(persister = %id, namespace = %namespace.name(), "Mirror worker stopped");
}

/// Apply one op to the durable namespace.
pub(crate) async fn apply(namespace: &Namespace, op: MirrorOp) -> Result<()> {
    let id = op.id().clone();
    let prior = if op.needs_prior() {
        namespace.get(&id).await?
    } else {
        None
    };

    match op.resolve(prior.as_ref()) {
        Some(value) => {
            debug!(namespace = %namespace.name(), id = %id, tombstone = value.is_tombstone(), "Mirrored");
            namespace.set(&id, value).await
        }
        None => {
            debug!(namespace = %namespace.name(), id = %id, "Mirrored removal");
            namespace.remove(&id).await
        }
    }
}

/// A registered persister.
#[derive(Debug)]
pub(crate) struct Persister {
    pub(crate) query_id: QueryId,
    pub(crate) namespace: Namespace,
    pub(crate) queue: MirrorQueue,
    pub(crate) worker: JoinHandle<()>,
}

/// All persisters of one collection.
#[derive(Debug, Default)]
pub(crate) struct Persisters {
    entries: DashMap<PersisterId, Persister>,
    /// Workers of detached persisters that may still hold queued writes
    draining: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl Persisters {
    pub(crate) fn next_id(&self) -> PersisterId {
        PersisterId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn register(&self, id: PersisterId, persister: Persister) {
        self.entries.insert(id, persister);
    }

    /// Unregister a persister, returning its query id.
    ///
    /// Its worker is kept until [`drain`](Self::drain) so writes queued
    /// before the detach can still be awaited.
    pub(crate) fn remove(&self, id: PersisterId) -> Option<QueryId> {
        let (_, persister) = self.entries.remove(&id)?;
        let mut draining = self.draining.lock();
        draining.retain(|worker| !worker.is_finished());
        draining.push(persister.worker);
        Some(persister.query_id)
    }

    /// Wait for the workers of detached persisters to finish.
    ///
    /// A worker finishes once its observer has been stopped and its
    /// backlog applied.
    pub(crate) async fn drain(&self) {
        let workers = std::mem::take(&mut *self.draining.lock());
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Mirror worker ended abnormally");
            }
        }
    }

    /// Resolve a selector against the registry, in id order.
    pub(crate) fn select(&self, selector: IdSelector<PersisterId>) -> Vec<PersisterId> {
        match selector.into_ids() {
            Some(ids) => ids,
            None => self.ids(),
        }
    }

    pub(crate) fn ids(&self) -> Vec<PersisterId> {
        let mut ids: Vec<_> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub(crate) fn namespace_of(&self, id: PersisterId) -> Option<String> {
        self.entries
            .get(&id)
            .map(|entry| entry.namespace.name().to_string())
    }

    pub(crate) fn queues(&self) -> Vec<MirrorQueue> {
        self.entries
            .iter()
            .map(|entry| entry.queue.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
