//! Durable value encoding and offline tagging.
//!
//! A durable namespace maps document ids to either the document's fields
//! (without `_id`) or the literal `false`, a tombstone for a removal made
//! while disconnected. Records written while disconnected carry
//! `insertedOffline` / `updatedOffline` until they are reconciled.

use crate::{
    docs::{ChangeEvent, ChangeKind, ChangeOrigin},
    document::{json_type, ID_FIELD},
    error::Result,
    DocId, Error, Fields,
};
use serde_json::Value;

/// Flag set on records inserted while disconnected.
pub const INSERTED_OFFLINE: &str = "insertedOffline";

/// Flag set on records changed while disconnected.
pub const UPDATED_OFFLINE: &str = "updatedOffline";

/// A value at rest in a durable namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    /// Document fields, possibly carrying offline flags
    Record(Fields),
    /// Removal made while disconnected, consumed by the next sync
    Tombstone,
}

impl StoredValue {
    /// Decode the JSON stored under `id`.
    pub fn decode(id: &str, value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(StoredValue::Record(fields)),
            Value::Bool(false) => Ok(StoredValue::Tombstone),
            other => Err(Error::InvalidStoredValue {
                id: id.to_string(),
                reason: format!("expected object or false, got {}", json_type(&other)),
            }),
        }
    }

    /// Decode a value handed in for storage under `id`.
    ///
    /// Records never keep their id as a field at rest: an `_id` equal to the
    /// key is dropped and any other `_id` is rejected.
    pub fn for_key(id: &str, value: Value) -> Result<Self> {
        let mut stored = Self::decode(id, value)?;
        if let StoredValue::Record(fields) = &mut stored {
            match fields.remove(ID_FIELD) {
                None => {}
                Some(Value::String(own)) if own == id => {}
                Some(other) => {
                    return Err(Error::InvalidStoredValue {
                        id: id.to_string(),
                        reason: format!("{ID_FIELD} {other} does not match the key"),
                    })
                }
            }
        }
        Ok(stored)
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, StoredValue::Tombstone)
    }

    pub fn as_record(&self) -> Option<&Fields> {
        match self {
            StoredValue::Record(fields) => Some(fields),
            StoredValue::Tombstone => None,
        }
    }

    /// Offline flags held by this value. Tombstones hold none.
    pub fn flags(&self) -> OfflineFlags {
        self.as_record().map(OfflineFlags::read).unwrap_or_default()
    }
}

impl From<StoredValue> for Value {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Record(fields) => Value::Object(fields),
            StoredValue::Tombstone => Value::Bool(false),
        }
    }
}

/// Offline provenance of a durable record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfflineFlags {
    pub inserted: bool,
    pub updated: bool,
}

impl OfflineFlags {
    pub const NONE: Self = Self {
        inserted: false,
        updated: false,
    };

    pub const INSERTED: Self = Self {
        inserted: true,
        updated: false,
    };

    pub const UPDATED: Self = Self {
        inserted: false,
        updated: true,
    };

    /// Read the flags present on a record. Only a literal `true` counts.
    pub fn read(fields: &Fields) -> Self {
        let is_set = |key: &str| fields.get(key) == Some(&Value::Bool(true));
        Self {
            inserted: is_set(INSERTED_OFFLINE),
            updated: is_set(UPDATED_OFFLINE),
        }
    }

    /// Remove both flag fields from a record, returning what was set.
    pub fn take(fields: &mut Fields) -> Self {
        let flags = Self::read(fields);
        fields.remove(INSERTED_OFFLINE);
        fields.remove(UPDATED_OFFLINE);
        flags
    }

    /// Write the set flags onto a record.
    pub fn apply(self, fields: &mut Fields) {
        if self.inserted {
            fields.insert(INSERTED_OFFLINE.to_string(), Value::Bool(true));
        }
        if self.updated {
            fields.insert(UPDATED_OFFLINE.to_string(), Value::Bool(true));
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            inserted: self.inserted || other.inserted,
            updated: self.updated || other.updated,
        }
    }

    pub fn is_empty(self) -> bool {
        !self.inserted && !self.updated
    }
}

/// A durable write derived from one change event.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOp {
    /// Store the document's fields under its id
    Write {
        id: DocId,
        fields: Fields,
        /// Flags earned by this change
        tag: OfflineFlags,
        /// Carry over flags already on the durable record
        sticky: bool,
    },
    /// Delete the durable record outright
    Remove { id: DocId },
    /// Replace the durable record with a tombstone
    Tombstone { id: DocId },
}

impl MirrorOp {
    /// Translate a change event into the write it requires.
    ///
    /// `connected` must be polled at the moment the event is delivered.
    /// While disconnected in common mode, additions (including a query's
    /// initial results) are tagged `insertedOffline`, changes
    /// `updatedOffline`, and removals become tombstones. Events produced by
    /// a reconciliation merge are mirrored as-is: never tagged, never
    /// tombstoned.
    pub fn from_event(event: ChangeEvent, connected: bool, common: bool) -> Self {
        let offline_edit = common && !connected && event.origin != ChangeOrigin::Merge;
        let (id, fields) = event.document.into_parts();

        match event.kind {
            ChangeKind::Added | ChangeKind::Changed => {
                let tag = match (offline_edit, event.kind) {
                    (false, _) => OfflineFlags::NONE,
                    (true, ChangeKind::Added) => OfflineFlags::INSERTED,
                    (true, _) => OfflineFlags::UPDATED,
                };
                MirrorOp::Write {
                    id,
                    fields,
                    tag,
                    sticky: common,
                }
            }
            ChangeKind::Removed if offline_edit => MirrorOp::Tombstone { id },
            ChangeKind::Removed => MirrorOp::Remove { id },
        }
    }

    pub fn id(&self) -> &DocId {
        match self {
            MirrorOp::Write { id, .. } | MirrorOp::Remove { id } | MirrorOp::Tombstone { id } => id,
        }
    }

    /// Whether resolving this op needs the prior durable value.
    pub fn needs_prior(&self) -> bool {
        matches!(self, MirrorOp::Write { sticky: true, .. })
    }

    /// The value to store, or `None` when the record must be deleted.
    ///
    /// Flags are sticky: a write carries over whatever flags the prior
    /// record still holds, so a record inserted offline and then changed
    /// offline keeps both until it is reconciled.
    pub fn resolve(self, prior: Option<&StoredValue>) -> Option<StoredValue> {
        match self {
            MirrorOp::Write {
                mut fields,
                tag,
                sticky,
                ..
            } => {
                let inherited = match (sticky, prior) {
                    (true, Some(prior)) => prior.flags(),
                    _ => OfflineFlags::NONE,
                };
                // Fields coming from the live set never carry flags of their own.
                OfflineFlags::take(&mut fields);
                inherited.union(tag).apply(&mut fields);
                Some(StoredValue::Record(fields))
            }
            MirrorOp::Tombstone { .. } => Some(StoredValue::Tombstone),
            MirrorOp::Remove { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Document;
    use serde_json::json;

    fn event(kind: ChangeKind, origin: ChangeOrigin, value: Value) -> ChangeEvent {
        ChangeEvent {
            kind,
            document: Document::from_value(value).unwrap(),
            origin,
        }
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn decode_records_and_tombstones() {
        assert_eq!(
            StoredValue::decode("a", json!({"x": 1})).unwrap(),
            StoredValue::Record(fields(json!({"x": 1})))
        );
        assert_eq!(
            StoredValue::decode("a", json!(false)).unwrap(),
            StoredValue::Tombstone
        );
        assert!(matches!(
            StoredValue::decode("a", json!(true)),
            Err(Error::InvalidStoredValue { .. })
        ));
        assert!(matches!(
            StoredValue::decode("a", json!("text")),
            Err(Error::InvalidStoredValue { .. })
        ));
    }

    #[test]
    fn encode_tombstone_as_false() {
        assert_eq!(Value::from(StoredValue::Tombstone), json!(false));
    }

    #[test]
    fn flags_read_take_apply() {
        let mut record = fields(json!({"x": 1, "insertedOffline": true, "updatedOffline": "no"}));
        assert_eq!(OfflineFlags::read(&record), OfflineFlags::INSERTED);

        let taken = OfflineFlags::take(&mut record);
        assert_eq!(taken, OfflineFlags::INSERTED);
        assert_eq!(record, fields(json!({"x": 1})));

        OfflineFlags::INSERTED
            .union(OfflineFlags::UPDATED)
            .apply(&mut record);
        assert_eq!(
            record,
            fields(json!({"x": 1, "insertedOffline": true, "updatedOffline": true}))
        );
    }

    #[test]
    fn offline_added_in_common_mode_is_tagged() {
        let op = MirrorOp::from_event(
            event(ChangeKind::Added, ChangeOrigin::Mutation, json!({"_id": "a", "name": "a"})),
            false,
            true,
        );

        assert_eq!(op.id(), "a");
        assert_eq!(
            op.resolve(None),
            Some(StoredValue::Record(fields(
                json!({"name": "a", "insertedOffline": true})
            )))
        );
    }

    #[test]
    fn online_or_plain_mode_is_not_tagged() {
        let online = MirrorOp::from_event(
            event(ChangeKind::Changed, ChangeOrigin::Mutation, json!({"_id": "a", "n": 1})),
            true,
            true,
        );
        assert_eq!(
            online.resolve(None),
            Some(StoredValue::Record(fields(json!({"n": 1}))))
        );

        let plain = MirrorOp::from_event(
            event(ChangeKind::Changed, ChangeOrigin::Mutation, json!({"_id": "a", "n": 1})),
            false,
            false,
        );
        assert!(!plain.needs_prior());
        assert_eq!(
            plain.resolve(None),
            Some(StoredValue::Record(fields(json!({"n": 1}))))
        );
    }

    #[test]
    fn offline_removal_becomes_tombstone() {
        let removed = event(ChangeKind::Removed, ChangeOrigin::Mutation, json!({"_id": "a"}));

        let offline = MirrorOp::from_event(removed.clone(), false, true);
        assert_eq!(offline, MirrorOp::Tombstone { id: "a".into() });
        assert_eq!(offline.resolve(None), Some(StoredValue::Tombstone));

        let online = MirrorOp::from_event(removed.clone(), true, true);
        assert_eq!(online, MirrorOp::Remove { id: "a".into() });
        assert_eq!(online.resolve(None), None);

        let plain = MirrorOp::from_event(removed, false, false);
        assert_eq!(plain, MirrorOp::Remove { id: "a".into() });
    }

    #[test]
    fn values_for_a_key_drop_their_id() {
        assert_eq!(
            StoredValue::for_key("a", json!({"_id": "a", "x": 1})).unwrap(),
            StoredValue::Record(fields(json!({"x": 1})))
        );
        assert_eq!(
            StoredValue::for_key("a", json!(false)).unwrap(),
            StoredValue::Tombstone
        );
        assert!(matches!(
            StoredValue::for_key("a", json!({"_id": "zzz", "x": 1})),
            Err(Error::InvalidStoredValue { ref id, .. }) if id == "a"
        ));
        assert!(StoredValue::for_key("a", json!({"_id": 7})).is_err());
    }

    #[test]
    fn merge_events_are_mirrored_untagged() {
        let added = event(ChangeKind::Added, ChangeOrigin::Merge, json!({"_id": "a", "x": 1}));
        assert_eq!(
            MirrorOp::from_event(added, false, true),
            MirrorOp::Write {
                id: "a".into(),
                fields: fields(json!({"x": 1})),
                tag: OfflineFlags::NONE,
                sticky: true,
            }
        );

        let removed = event(ChangeKind::Removed, ChangeOrigin::Merge, json!({"_id": "a"}));
        assert_eq!(
            MirrorOp::from_event(removed, false, true),
            MirrorOp::Remove { id: "a".into() }
        );
    }

    #[test]
    fn initial_results_are_tagged_while_offline() {
        let initial = event(ChangeKind::Added, ChangeOrigin::Initial, json!({"_id": "a", "n": 1}));

        let offline = MirrorOp::from_event(initial.clone(), false, true);
        assert_eq!(
            offline.resolve(None),
            Some(StoredValue::Record(fields(json!({"n": 1, "insertedOffline": true}))))
        );

        let online = MirrorOp::from_event(initial, true, true);
        assert_eq!(
            online.resolve(None),
            Some(StoredValue::Record(fields(json!({"n": 1}))))
        );
    }

    #[test]
    fn offline_change_after_offline_insert_keeps_both_flags() {
        let prior = StoredValue::Record(fields(json!({"n": 1, "insertedOffline": true})));
        let op = MirrorOp::from_event(
            event(ChangeKind::Changed, ChangeOrigin::Mutation, json!({"_id": "a", "n": 2})),
            false,
            true,
        );

        assert!(op.needs_prior());
        assert_eq!(
            op.resolve(Some(&prior)),
            Some(StoredValue::Record(fields(
                json!({"n": 2, "insertedOffline": true, "updatedOffline": true})
            )))
        );
    }

    #[test]
    fn online_change_keeps_pending_flags() {
        let prior = StoredValue::Record(fields(json!({"n": 1, "updatedOffline": true})));
        let op = MirrorOp::from_event(
            event(ChangeKind::Changed, ChangeOrigin::Mutation, json!({"_id": "a", "n": 2})),
            true,
            true,
        );

        assert_eq!(
            op.resolve(Some(&prior)),
            Some(StoredValue::Record(fields(json!({"n": 2, "updatedOffline": true}))))
        );
    }

    #[test]
    fn write_over_tombstone_inherits_nothing() {
        let op = MirrorOp::from_event(
            event(ChangeKind::Added, ChangeOrigin::Mutation, json!({"_id": "a"})),
            true,
            true,
        );
        assert_eq!(
            op.resolve(Some(&StoredValue::Tombstone)),
            Some(StoredValue::Record(Fields::new()))
        );
    }
}
