//! Reconciliation of durable contents back into the live set.
//!
//! Planning is pure: given everything stored in a collection's durable
//! namespace, the [`Reconciler`] decides what to merge, what to delete,
//! what to rewrite without offline flags, and how each record is reported.
//!
//! # Classification (common mode only)
//!
//! | stored value                         | reported as | merged       |
//! |--------------------------------------|-------------|--------------|
//! | `false`                              | removed     | deleted      |
//! | `insertedOffline` (with or without `updatedOffline`) | inserted | upserted |
//! | `updatedOffline` only                | updated     | upserted     |
//! | no flags                             | -           | upserted     |
//!
//! Outside common mode no flags are inspected and every record is merged
//! as-is; a stray tombstone is skipped and listed in
//! [`ReconcilePlan::ignored`].

use crate::{
    durable::{OfflineFlags, StoredValue},
    DocId, Document, Fields,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classified outcome of a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDiff {
    /// Records created while disconnected
    pub inserted: Vec<Document>,
    /// Records changed while disconnected
    pub updated: Vec<Document>,
    /// Ids of records removed while disconnected
    pub removed: Vec<DocId>,
}

impl SyncDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of classified records.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.removed.len()
    }
}

/// How a single stored entry is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Inserted,
    Updated,
    Removed,
    /// Ordinary mirrored record with no offline provenance
    Mirrored,
    /// Tombstone outside common mode
    Ignored,
}

/// Everything a sync pass has to do, in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Documents to upsert into the live set, flags stripped
    pub merge: Vec<Document>,
    /// Ids to delete from the live set; their tombstones are consumed
    pub tombstones: Vec<DocId>,
    /// Records whose flags were stripped, to be written back
    pub write_back: BTreeMap<DocId, Fields>,
    /// Tombstones skipped because the collection is not in common mode
    pub ignored: Vec<DocId>,
    pub diff: SyncDiff,
}

/// Plans reconciliation passes for one collection.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    common: bool,
}

impl Reconciler {
    /// Create a reconciler; `common` enables flags and tombstones.
    pub fn new(common: bool) -> Self {
        Self { common }
    }

    /// Classify one stored value without consuming it.
    pub fn classify(&self, value: &StoredValue) -> Classification {
        match (self.common, value) {
            (true, StoredValue::Tombstone) => Classification::Removed,
            (false, StoredValue::Tombstone) => Classification::Ignored,
            (false, StoredValue::Record(_)) => Classification::Mirrored,
            (true, StoredValue::Record(fields)) => match OfflineFlags::read(fields) {
                OfflineFlags { inserted: true, .. } => Classification::Inserted,
                OfflineFlags { updated: true, .. } => Classification::Updated,
                _ => Classification::Mirrored,
            },
        }
    }

    /// Plan a pass over the full contents of a durable namespace.
    pub fn plan(self, entries: BTreeMap<DocId, StoredValue>) -> ReconcilePlan {
        let mut plan = ReconcilePlan::default();

        for (id, value) in entries {
            let classification = self.classify(&value);
            let mut fields = match value {
                StoredValue::Tombstone => {
                    match classification {
                        Classification::Removed => {
                            plan.diff.removed.push(id.clone());
                            plan.tombstones.push(id);
                        }
                        _ => plan.ignored.push(id),
                    }
                    continue;
                }
                StoredValue::Record(fields) => fields,
            };

            if self.common {
                let flags = OfflineFlags::take(&mut fields);
                if !flags.is_empty() {
                    plan.write_back.insert(id.clone(), fields.clone());
                }
            }

            let doc = Document::new(id, fields);
            match classification {
                Classification::Inserted => plan.diff.inserted.push(doc.clone()),
                Classification::Updated => plan.diff.updated.push(doc.clone()),
                _ => {}
            }
            plan.merge.push(doc);
        }

        plan
    }
}
