//! # Persist Engine
//!
//! Offline tagging and reconciliation core for persisted collections.
//!
//! A persisted collection mirrors a live, in-memory document set into a
//! durable key-value namespace. Mutations made while disconnected are tagged
//! in durable storage so that a later sync pass can report them as a
//! classified diff and merge durable state back into the live set.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches storage or the network; the
//!   `persist-store` crate drives it
//! - **Deterministic**: reconciliation plans are produced in id order
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A [`Document`] is an id plus a JSON field mapping. At rest the id is the
//! store key and never a field.
//!
//! ### Live document set
//!
//! [`DocumentSet`] holds the in-memory documents and the live queries
//! observing them. Observers receive [`ChangeEvent`]s tagged with a
//! [`ChangeOrigin`]. Reconciliation writes through the privileged
//! [`MergeBatch`], which recomputes every query once on commit.
//!
//! ### Durable values
//!
//! A durable entry is a [`StoredValue`]: the document's fields or a
//! tombstone (`false`). [`MirrorOp::from_event`] turns a change event into
//! the durable write it requires, tagging offline edits.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] classifies every durable entry and produces a
//! [`ReconcilePlan`] whose [`SyncDiff`] reports inserted, updated and
//! removed records.
//!
//! ## Quick Start
//!
//! ```rust
//! use persist_engine::{
//!     ChangeEvent, DocumentSet, FindOptions, MirrorOp, Reconciler, Selector, StoredValue,
//! };
//! use serde_json::json;
//! use std::collections::BTreeMap;
//! use std::sync::{Arc, Mutex};
//!
//! // 1. Observe the live set and translate events into durable writes
//! let ops = Arc::new(Mutex::new(Vec::new()));
//! let sink = ops.clone();
//! let mut docs = DocumentSet::new();
//! docs.observe(Selector::all(), FindOptions::default(), move |event: ChangeEvent| {
//!     let connected = false;
//!     let common = true;
//!     sink.lock().unwrap().push(MirrorOp::from_event(event, connected, common));
//! });
//!
//! // 2. Mutate while offline
//! docs.insert_value(json!({"_id": "a", "name": "a"})).unwrap();
//!
//! // 3. Apply the writes to a durable namespace
//! let mut durable = BTreeMap::new();
//! for op in ops.lock().unwrap().drain(..) {
//!     let id = op.id().clone();
//!     if let Some(value) = op.resolve(durable.get(&id)) {
//!         durable.insert(id, value);
//!     }
//! }
//! assert_eq!(
//!     serde_json::Value::from(durable["a"].clone()),
//!     json!({"name": "a", "insertedOffline": true})
//! );
//!
//! // 4. Reconcile
//! let plan = Reconciler::new(true).plan(durable);
//! assert_eq!(plan.diff.inserted[0].clone().into_value(), json!({"_id": "a", "name": "a"}));
//! ```

pub mod docs;
pub mod document;
pub mod durable;
pub mod error;
pub mod reconcile;
pub mod selector;

// Re-export main types at crate root
pub use docs::{
    ChangeEvent, ChangeKind, ChangeOrigin, DocumentSet, MergeBatch, Observer, QueryId,
};
pub use document::{generate_id, Document, Fields, IdSelector, ID_FIELD};
pub use durable::{MirrorOp, OfflineFlags, StoredValue, INSERTED_OFFLINE, UPDATED_OFFLINE};
pub use error::{Error, Result};
pub use reconcile::{Classification, ReconcilePlan, Reconciler, SyncDiff};
pub use selector::{Condition, FindOptions, Selector, SortOrder};

/// Identifier of a document within its collection.
pub type DocId = String;
