//! The live document set.
//!
//! Holds every document of a collection in memory together with the live
//! queries observing it. Validated mutations notify observers right away;
//! the privileged [`MergeBatch`] writes without notification and recomputes
//! every query once when it is committed.

use crate::{
    error::Result, selector::FindOptions, DocId, Document, Error, Fields, Selector,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifier of a live query, unique within one document set.
pub type QueryId = u64;

/// What happened to a document within a query's result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Why a change event was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Initial result set delivered when the observation starts
    Initial,
    /// A validated insert, update or remove
    Mutation,
    /// A reconciliation merge from durable storage
    Merge,
}

/// A single change delivered to an observer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// The document after the change, or its last value for removals
    pub document: Document,
    pub origin: ChangeOrigin,
}

/// Receives change events of a live query.
///
/// Called synchronously while the document set is being mutated, so
/// implementations must not block.
pub trait Observer: Send {
    fn on_change(&mut self, event: ChangeEvent);
}

impl<F> Observer for F
where
    F: FnMut(ChangeEvent) + Send,
{
    fn on_change(&mut self, event: ChangeEvent) {
        self(event)
    }
}

struct LiveQuery {
    selector: Selector,
    options: FindOptions,
    results: BTreeMap<DocId, Document>,
    observer: Box<dyn Observer>,
}

impl LiveQuery {
    fn evaluate(&self, docs: &BTreeMap<DocId, Document>) -> BTreeMap<DocId, Document> {
        let matched = docs
            .values()
            .filter(|doc| self.selector.matches(doc))
            .collect();
        self.options
            .apply(matched)
            .into_iter()
            .map(|doc| (doc.id.clone(), doc.clone()))
            .collect()
    }

    /// Whether membership of one document can be decided in isolation.
    fn is_unpaged(&self) -> bool {
        self.options.skip == 0 && self.options.limit.is_none()
    }

    /// Deliver the effect of a change to the single document `id`.
    ///
    /// Only valid for unpaged queries; paged ones must be re-run in full.
    fn refresh_one(&mut self, id: &str, doc: Option<&Document>, origin: ChangeOrigin) {
        let matched = doc.filter(|doc| self.selector.matches(doc));
        let event = match matched {
            None => self
                .results
                .remove(id)
                .map(|old| (ChangeKind::Removed, old)),
            Some(doc) => match self.results.insert(doc.id.clone(), doc.clone()) {
                None => Some((ChangeKind::Added, doc.clone())),
                Some(old) if old != *doc => Some((ChangeKind::Changed, doc.clone())),
                Some(_) => None,
            },
        };

        if let Some((kind, document)) = event {
            self.observer.on_change(ChangeEvent {
                kind,
                document,
                origin,
            });
        }
    }

    /// Re-run the query and deliver the difference to the observer.
    fn refresh(&mut self, docs: &BTreeMap<DocId, Document>, origin: ChangeOrigin) {
        let current = self.evaluate(docs);
        let previous = std::mem::replace(&mut self.results, current);

        let mut events = Vec::new();
        for (id, old) in &previous {
            if !self.results.contains_key(id) {
                events.push((ChangeKind::Removed, old.clone()));
            }
        }
        for (id, doc) in &self.results {
            match previous.get(id) {
                None => events.push((ChangeKind::Added, doc.clone())),
                Some(old) if old != doc => events.push((ChangeKind::Changed, doc.clone())),
                Some(_) => {}
            }
        }

        for (kind, document) in events {
            self.observer.on_change(ChangeEvent {
                kind,
                document,
                origin,
            });
        }
    }
}

/// In-memory documents of one collection plus its live queries.
#[derive(Default)]
pub struct DocumentSet {
    docs: BTreeMap<DocId, Document>,
    queries: BTreeMap<QueryId, LiveQuery>,
    next_query_id: QueryId,
}

impl std::fmt::Debug for DocumentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSet")
            .field("docs", &self.docs.len())
            .field("queries", &self.queries.len())
            .finish()
    }
}

impl DocumentSet {
    /// Create an empty document set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a document by id.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.docs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// All documents in id order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    /// Run a one-off query.
    pub fn find(&self, selector: &Selector, options: &FindOptions) -> Vec<Document> {
        let matched = self.docs.values().filter(|doc| selector.matches(doc)).collect();
        options.apply(matched).into_iter().cloned().collect()
    }

    /// Insert a new document. Fails if the id is already taken.
    pub fn insert(&mut self, doc: Document) -> Result<DocId> {
        if self.docs.contains_key(&doc.id) {
            return Err(Error::DocumentAlreadyExists(doc.id));
        }
        let id = doc.id.clone();
        self.docs.insert(id.clone(), doc);
        self.refresh_document(&id);
        Ok(id)
    }

    /// Insert a document given as JSON, generating an id if it has none.
    pub fn insert_value(&mut self, value: Value) -> Result<DocId> {
        self.insert(Document::from_value(value)?)
    }

    /// Replace the fields of an existing document.
    pub fn update(&mut self, id: &str, fields: Fields) -> Result<()> {
        let doc = self
            .docs
            .get_mut(id)
            .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;
        *doc = Document::new(id, fields);
        self.refresh_document(id);
        Ok(())
    }

    /// Remove a document, returning its last value.
    pub fn remove(&mut self, id: &str) -> Result<Document> {
        let doc = self
            .docs
            .remove(id)
            .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;
        self.refresh_document(id);
        Ok(doc)
    }

    /// Start observing a query.
    ///
    /// The observer first receives an `Added` event for every document
    /// currently matching, then every later change to the result set.
    pub fn observe(
        &mut self,
        selector: Selector,
        options: FindOptions,
        observer: impl Observer + 'static,
    ) -> QueryId {
        self.next_query_id += 1;
        let query_id = self.next_query_id;

        let mut query = LiveQuery {
            selector,
            options,
            results: BTreeMap::new(),
            observer: Box::new(observer),
        };
        query.refresh(&self.docs, ChangeOrigin::Initial);
        self.queries.insert(query_id, query);
        query_id
    }

    /// Stop a live query. Returns false if it was not active.
    pub fn stop(&mut self, query_id: QueryId) -> bool {
        self.queries.remove(&query_id).is_some()
    }

    /// Number of active live queries.
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Open a privileged bulk merge.
    ///
    /// Writes made through the batch skip validation and notification. The
    /// caller guarantees id uniqueness; every active query is recomputed
    /// exactly once when the batch is committed or dropped.
    pub fn begin_merge(&mut self) -> MergeBatch<'_> {
        MergeBatch {
            set: self,
            finished: false,
        }
    }

    /// Propagate a validated mutation of one document to every query.
    fn refresh_document(&mut self, id: &str) {
        let doc = self.docs.get(id);
        for query in self.queries.values_mut() {
            if query.is_unpaged() {
                query.refresh_one(id, doc, ChangeOrigin::Mutation);
            } else {
                query.refresh(&self.docs, ChangeOrigin::Mutation);
            }
        }
    }

    fn refresh_queries(&mut self, origin: ChangeOrigin) -> usize {
        for query in self.queries.values_mut() {
            query.refresh(&self.docs, origin);
        }
        self.queries.len()
    }
}

/// A bulk write into a [`DocumentSet`] that bypasses the validated API.
pub struct MergeBatch<'a> {
    set: &'a mut DocumentSet,
    finished: bool,
}

impl MergeBatch<'_> {
    /// Insert or overwrite a document.
    pub fn upsert(&mut self, doc: Document) {
        self.set.docs.insert(doc.id.clone(), doc);
    }

    /// Delete a document if present.
    pub fn remove(&mut self, id: &str) -> Option<Document> {
        self.set.docs.remove(id)
    }

    /// Finish the merge and recompute every active query once.
    ///
    /// Returns the number of queries recomputed.
    pub fn commit(mut self) -> usize {
        self.finished = true;
        self.set.refresh_queries(ChangeOrigin::Merge)
    }
}

impl Drop for MergeBatch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.set.refresh_queries(ChangeOrigin::Merge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<ChangeEvent>>>;

    fn recorder() -> (Log, impl Observer + 'static) {
        let log: Log = Arc::default();
        let sink = log.clone();
        (log, move |event: ChangeEvent| {
            sink.lock().unwrap().push(event)
        })
    }

    fn kinds(log: &Log) -> Vec<(ChangeKind, String, ChangeOrigin)> {
        log.lock()
            .unwrap()
            .iter()
            .map(|e| (e.kind, e.document.id.clone(), e.origin))
            .collect()
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn observe_delivers_initial_results() {
        let mut set = DocumentSet::new();
        set.insert_value(json!({"_id": "a", "n": 1})).unwrap();
        set.insert_value(json!({"_id": "b", "n": 2})).unwrap();

        let (log, observer) = recorder();
        set.observe(Selector::all(), FindOptions::default(), observer);

        assert_eq!(
            kinds(&log),
            vec![
                (ChangeKind::Added, "a".into(), ChangeOrigin::Initial),
                (ChangeKind::Added, "b".into(), ChangeOrigin::Initial),
            ]
        );
    }

    #[test]
    fn mutations_notify_observers() {
        let mut set = DocumentSet::new();
        let (log, observer) = recorder();
        set.observe(Selector::all(), FindOptions::default(), observer);

        set.insert_value(json!({"_id": "a", "n": 1})).unwrap();
        set.update("a", fields(json!({"n": 2}))).unwrap();
        let removed = set.remove("a").unwrap();

        assert_eq!(removed.fields.get("n"), Some(&json!(2)));
        assert_eq!(
            kinds(&log),
            vec![
                (ChangeKind::Added, "a".into(), ChangeOrigin::Mutation),
                (ChangeKind::Changed, "a".into(), ChangeOrigin::Mutation),
                (ChangeKind::Removed, "a".into(), ChangeOrigin::Mutation),
            ]
        );
    }

    #[test]
    fn update_leaving_selector_is_a_removal() {
        let mut set = DocumentSet::new();
        set.insert_value(json!({"_id": "a", "done": false})).unwrap();

        let (log, observer) = recorder();
        set.observe(Selector::eq("done", false), FindOptions::default(), observer);
        set.update("a", fields(json!({"done": true}))).unwrap();

        assert_eq!(
            kinds(&log),
            vec![
                (ChangeKind::Added, "a".into(), ChangeOrigin::Initial),
                (ChangeKind::Removed, "a".into(), ChangeOrigin::Mutation),
            ]
        );
    }

    #[test]
    fn limit_pushes_documents_out() {
        let mut set = DocumentSet::new();
        set.insert_value(json!({"_id": "b"})).unwrap();

        let (log, observer) = recorder();
        set.observe(Selector::all(), FindOptions::default().limit(1), observer);
        set.insert_value(json!({"_id": "a"})).unwrap();

        assert_eq!(
            kinds(&log),
            vec![
                (ChangeKind::Added, "b".into(), ChangeOrigin::Initial),
                (ChangeKind::Removed, "b".into(), ChangeOrigin::Mutation),
                (ChangeKind::Added, "a".into(), ChangeOrigin::Mutation),
            ]
        );
    }

    #[test]
    fn unpaged_queries_track_single_document_changes() {
        let mut set = DocumentSet::new();
        let selector = Selector::eq("done", false);
        let (log, observer) = recorder();
        let query_id = set.observe(selector.clone(), FindOptions::default(), observer);

        set.insert_value(json!({"_id": "a", "done": false})).unwrap();
        set.insert_value(json!({"_id": "b", "done": true})).unwrap();
        set.update("b", fields(json!({"done": false}))).unwrap();
        set.update("a", fields(json!({"done": false}))).unwrap();
        set.update("a", fields(json!({"done": true}))).unwrap();

        assert_eq!(
            kinds(&log),
            vec![
                (ChangeKind::Added, "a".into(), ChangeOrigin::Mutation),
                (ChangeKind::Added, "b".into(), ChangeOrigin::Mutation),
                (ChangeKind::Removed, "a".into(), ChangeOrigin::Mutation),
            ]
        );

        let tracked: Vec<_> = set.queries[&query_id].results.keys().cloned().collect();
        let expected: Vec<_> = set
            .find(&selector, &FindOptions::default())
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        assert_eq!(tracked, expected);
    }

    #[test]
    fn validated_mutations_reject_bad_ids() {
        let mut set = DocumentSet::new();
        set.insert_value(json!({"_id": "a"})).unwrap();

        assert_eq!(
            set.insert_value(json!({"_id": "a"})),
            Err(Error::DocumentAlreadyExists("a".into()))
        );
        assert_eq!(
            set.update("zzz", Fields::new()),
            Err(Error::DocumentNotFound("zzz".into()))
        );
        assert!(matches!(set.remove("zzz"), Err(Error::DocumentNotFound(_))));
    }

    #[test]
    fn stopped_query_receives_nothing() {
        let mut set = DocumentSet::new();
        let (log, observer) = recorder();
        let query_id = set.observe(Selector::all(), FindOptions::default(), observer);

        assert!(set.stop(query_id));
        assert!(!set.stop(query_id));
        set.insert_value(json!({"_id": "a"})).unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(set.query_count(), 0);
    }

    #[test]
    fn merge_batch_recomputes_once_on_commit() {
        let mut set = DocumentSet::new();
        set.insert_value(json!({"_id": "gone"})).unwrap();

        let (log, observer) = recorder();
        set.observe(Selector::all(), FindOptions::default(), observer);
        log.lock().unwrap().clear();

        let mut batch = set.begin_merge();
        batch.upsert(Document::from_value(json!({"_id": "a", "x": 1})).unwrap());
        batch.upsert(Document::from_value(json!({"_id": "b", "x": 2})).unwrap());
        assert!(batch.remove("gone").is_some());
        assert_eq!(batch.commit(), 1);

        assert_eq!(
            kinds(&log),
            vec![
                (ChangeKind::Removed, "gone".into(), ChangeOrigin::Merge),
                (ChangeKind::Added, "a".into(), ChangeOrigin::Merge),
                (ChangeKind::Added, "b".into(), ChangeOrigin::Merge),
            ]
        );
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn dropped_merge_batch_still_recomputes() {
        let mut set = DocumentSet::new();
        let (log, observer) = recorder();
        set.observe(Selector::all(), FindOptions::default(), observer);

        {
            let mut batch = set.begin_merge();
            batch.upsert(Document::from_value(json!({"_id": "a"})).unwrap());
        }

        assert_eq!(
            kinds(&log),
            vec![(ChangeKind::Added, "a".into(), ChangeOrigin::Merge)]
        );
    }

    #[test]
    fn merge_of_identical_document_is_silent() {
        let mut set = DocumentSet::new();
        set.insert_value(json!({"_id": "a", "x": 1})).unwrap();
        let (log, observer) = recorder();
        set.observe(Selector::all(), FindOptions::default(), observer);
        log.lock().unwrap().clear();

        let mut batch = set.begin_merge();
        batch.upsert(Document::from_value(json!({"_id": "a", "x": 1})).unwrap());
        batch.commit();

        assert!(log.lock().unwrap().is_empty());
    }
}
