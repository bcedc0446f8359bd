//! In-memory document collection.
//!
//! Thread-safe `QuerySource` implementation intended for embedded usage,
//! tests, and as a reference for the notification contract. Every write
//! recomputes the ordered match list and notifies each listener with change
//! metadata whose indices can be applied one after another.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::future::{self, BoxFuture, FutureExt};

use crate::error::StoreError;
use crate::snapshot::{DocumentChange, DocumentSnapshot, QuerySnapshot, SnapshotMetadata};
use crate::source::{
    auto_id, DocumentRef, GetOptions, ListenOptions, ListenerHandle, QuerySource, ReadSource,
    SnapshotSink,
};

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

fn lock_err(context: &'static str) -> StoreError {
    StoreError::backend(format!("poisoned lock: {context}"))
}

struct Listener<T> {
    id: u64,
    sink: SnapshotSink<T>,
    include_metadata_changes: bool,
    last: Vec<DocumentSnapshot<T>>,
    last_metadata: SnapshotMetadata,
}

struct State<T> {
    docs: HashMap<String, T>,
    pending: HashSet<String>,
    from_cache: bool,
    listeners: Vec<Listener<T>>,
    next_listener: u64,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            docs: HashMap::new(),
            pending: HashSet::new(),
            from_cache: false,
            listeners: Vec::new(),
            next_listener: 1,
        }
    }
}

/// Query over an in-memory document collection.
///
/// Matches are filtered by an optional predicate and ordered by an optional
/// comparator. Ties (and the unordered case) fall back to document id.
///
/// Notifications reach each listener in the order their change indices were
/// computed, whichever thread wrote. Sinks run while delivery is serialized
/// and must not write back into the collection.
pub struct InMemoryCollection<T> {
    path: String,
    filter: Option<Predicate<T>>,
    order: Option<Comparator<T>>,
    state: Arc<RwLock<State<T>>>,
    /// Held from computing a notification until every sink has it.
    delivery: Arc<Mutex<()>>,
}

impl<T> Clone for InMemoryCollection<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            filter: self.filter.clone(),
            order: self.order.clone(),
            state: Arc::clone(&self.state),
            delivery: Arc::clone(&self.delivery),
        }
    }
}

impl<T> fmt::Debug for InMemoryCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCollection")
            .field("path", &self.path)
            .field("filtered", &self.filter.is_some())
            .field("ordered", &self.order.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> InMemoryCollection<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates an empty collection at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filter: None,
            order: None,
            state: Arc::new(RwLock::new(State::default())),
            delivery: Arc::new(Mutex::new(())),
        }
    }

    /// Restricts the query to documents matching `predicate`.
    #[must_use]
    pub fn filtered(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Orders the query results with `compare`.
    #[must_use]
    pub fn ordered_by(mut self, compare: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.order = Some(Arc::new(compare));
        self
    }

    /// Creates or replaces a document.
    pub fn set(&self, id: impl Into<String>, data: T) -> Result<(), StoreError> {
        let id = id.into();
        self.mutate("set", |state| {
            state.docs.insert(id, data);
            Ok(())
        })
    }

    /// Replaces an existing document.
    pub fn update(&self, id: &str, data: T) -> Result<(), StoreError> {
        self.mutate("update", |state| match state.docs.get_mut(id) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                path: format!("{}/{id}", self.path),
            }),
        })
    }

    /// Deletes an existing document.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.mutate("delete", |state| {
            if state.docs.remove(id).is_none() {
                return Err(StoreError::NotFound {
                    path: format!("{}/{id}", self.path),
                });
            }
            state.pending.remove(id);
            Ok(())
        })
    }

    /// Marks a document as carrying unacknowledged local writes.
    pub fn set_pending_writes(&self, id: &str, pending: bool) -> Result<(), StoreError> {
        self.mutate("set_pending_writes", |state| {
            if pending {
                state.pending.insert(id.to_string());
            } else {
                state.pending.remove(id);
            }
            Ok(())
        })
    }

    /// Flags every snapshot as served from (or no longer from) the local cache.
    pub fn set_from_cache(&self, from_cache: bool) -> Result<(), StoreError> {
        self.mutate("set_from_cache", |state| {
            state.from_cache = from_cache;
            Ok(())
        })
    }

    /// Terminates every listener with `error`.
    pub fn fail_listeners(&self, error: &StoreError) -> Result<(), StoreError> {
        let _delivery = self.delivery.lock().map_err(|_| lock_err("fail_listeners"))?;
        let listeners = {
            let mut state = self.state.write().map_err(|_| lock_err("fail_listeners"))?;
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener.sink.fail(error.clone());
        }
        Ok(())
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("listener_count"))?;
        Ok(state.listeners.len())
    }

    /// Number of stored documents, matching or not.
    pub fn len(&self) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("len"))?;
        Ok(state.docs.len())
    }

    /// True when no document is stored.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Current ordered match list.
    pub fn matches(&self) -> Result<Vec<DocumentSnapshot<T>>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("matches"))?;
        Ok(self.current_matches(&state))
    }

    fn compare(&self, a: &DocumentSnapshot<T>, b: &DocumentSnapshot<T>) -> Ordering {
        self.order
            .as_ref()
            .map_or(Ordering::Equal, |order| order(&a.data, &b.data))
            .then_with(|| a.id.cmp(&b.id))
    }

    fn current_metadata(state: &State<T>) -> SnapshotMetadata {
        SnapshotMetadata::new(!state.pending.is_empty(), state.from_cache)
    }

    fn current_matches(&self, state: &State<T>) -> Vec<DocumentSnapshot<T>> {
        let mut matches: Vec<DocumentSnapshot<T>> = state
            .docs
            .iter()
            .filter(|(_, data)| self.filter.as_ref().map_or(true, |filter| filter(data)))
            .map(|(id, data)| {
                DocumentSnapshot::new(id.clone(), data.clone()).with_metadata(SnapshotMetadata::new(
                    state.pending.contains(id),
                    state.from_cache,
                ))
            })
            .collect();
        matches.sort_by(|a, b| self.compare(a, b));
        matches
    }

    /// Computes store-style change metadata between two ordered match lists.
    ///
    /// Removals come first (in old order), then additions and modifications
    /// in new order. Each index is taken against a tracker that already
    /// reflects every earlier change, so the list can be replayed in order.
    fn changes_between(
        &self,
        old: &[DocumentSnapshot<T>],
        new: &[DocumentSnapshot<T>],
    ) -> Vec<DocumentChange<T>> {
        let new_ids: HashSet<&str> = new.iter().map(|doc| doc.id.as_str()).collect();
        let mut tracker: Vec<DocumentSnapshot<T>> = old.to_vec();
        let mut changes = Vec::new();

        for doc in old {
            if new_ids.contains(doc.id.as_str()) {
                continue;
            }
            if let Some(idx) = tracker.iter().position(|d| d.id == doc.id) {
                tracker.remove(idx);
                changes.push(DocumentChange::removed(doc.clone(), idx));
            }
        }

        for doc in new {
            match tracker.iter().position(|d| d.id == doc.id) {
                None => {
                    let idx = tracker.partition_point(|d| self.compare(d, doc) == Ordering::Less);
                    tracker.insert(idx, doc.clone());
                    changes.push(DocumentChange::added(doc.clone(), idx));
                }
                Some(old_idx) => {
                    if tracker[old_idx].data == doc.data {
                        tracker[old_idx].metadata = doc.metadata;
                        continue;
                    }
                    tracker.remove(old_idx);
                    let idx = tracker.partition_point(|d| self.compare(d, doc) == Ordering::Less);
                    tracker.insert(idx, doc.clone());
                    changes.push(DocumentChange::modified(doc.clone(), old_idx, idx));
                }
            }
        }

        changes
    }

    fn mutate<F>(&self, context: &'static str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut State<T>) -> Result<(), StoreError>,
    {
        let _delivery = self.delivery.lock().map_err(|_| lock_err(context))?;
        let deliveries = {
            let mut state = self.state.write().map_err(|_| lock_err(context))?;
            apply(&mut state)?;
            self.pending_deliveries(&mut state)
        };

        // State lock released so sinks may read the store.
        for (sink, snapshot) in deliveries {
            sink.notify(snapshot);
        }
        Ok(())
    }

    fn pending_deliveries(&self, state: &mut State<T>) -> Vec<(SnapshotSink<T>, QuerySnapshot<T>)> {
        let matches = self.current_matches(state);
        let metadata = Self::current_metadata(state);
        let mut listeners = std::mem::take(&mut state.listeners);
        let mut out = Vec::with_capacity(listeners.len());

        for listener in &mut listeners {
            let changes = self.changes_between(&listener.last, &matches);
            let metadata_changed = metadata != listener.last_metadata
                || listener
                    .last
                    .iter()
                    .zip(matches.iter())
                    .any(|(a, b)| a.id == b.id && a.metadata != b.metadata);

            if changes.is_empty() && !(listener.include_metadata_changes && metadata_changed) {
                continue;
            }

            listener.last = matches.clone();
            listener.last_metadata = metadata;
            let snapshot = QuerySnapshot::new(matches.clone(), changes).with_metadata(metadata);
            out.push((listener.sink.clone(), snapshot));
        }

        state.listeners = listeners;
        out
    }
}

fn unregister<T>(state: &Weak<RwLock<State<T>>>, listener_id: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    if let Ok(mut state) = state.write() {
        state.listeners.retain(|l| l.id != listener_id);
    };
}

impl<T> QuerySource<T> for InMemoryCollection<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn path(&self) -> &str {
        &self.path
    }

    fn listen(&self, options: ListenOptions, sink: SnapshotSink<T>) -> Result<ListenerHandle, StoreError> {
        let delivery = self.delivery.lock().map_err(|_| lock_err("listen"))?;
        let (listener_id, initial) = {
            let mut state = self.state.write().map_err(|_| lock_err("listen"))?;
            let matches = self.current_matches(&state);
            let metadata = Self::current_metadata(&state);

            let listener_id = state.next_listener;
            state.next_listener += 1;
            state.listeners.push(Listener {
                id: listener_id,
                sink: sink.clone(),
                include_metadata_changes: options.include_metadata_changes,
                last: matches.clone(),
                last_metadata: metadata,
            });

            (listener_id, QuerySnapshot::initial(matches).with_metadata(metadata))
        };

        sink.notify(initial);
        drop(delivery);

        let state = Arc::downgrade(&self.state);
        Ok(ListenerHandle::new(move || unregister(&state, listener_id)))
    }

    fn get(&self, options: GetOptions) -> BoxFuture<'static, Result<QuerySnapshot<T>, StoreError>> {
        let result = self
            .state
            .read()
            .map_err(|_| lock_err("get"))
            .map(|state| {
                let mut metadata = Self::current_metadata(&state);
                metadata.from_cache |= options.source == ReadSource::Cache;
                (self.current_matches(&state), metadata, state.from_cache)
            })
            .and_then(|(matches, metadata, offline)| {
                if offline && options.source == ReadSource::Server {
                    return Err(StoreError::unavailable(format!(
                        "{} cannot be read from the server while offline",
                        self.path
                    )));
                }
                Ok(QuerySnapshot::initial(matches).with_metadata(metadata))
            });
        future::ready(result).boxed()
    }

    fn add(&self, data: T) -> BoxFuture<'static, Result<DocumentRef, StoreError>> {
        let id = auto_id();
        let result = self
            .set(id.clone(), data)
            .map(|()| DocumentRef::new(self.path.clone(), id));
        future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeType;
    use std::sync::Mutex;

    type Received = Arc<Mutex<Vec<Result<QuerySnapshot<i64>, StoreError>>>>;

    fn collection() -> InMemoryCollection<i64> {
        InMemoryCollection::new("numbers").ordered_by(|a: &i64, b: &i64| a.cmp(b))
    }

    fn recording_sink() -> (SnapshotSink<i64>, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let ok = Arc::clone(&received);
        let err = Arc::clone(&received);
        let sink = SnapshotSink::new(
            move |snap| ok.lock().unwrap().push(Ok(snap)),
            move |e| err.lock().unwrap().push(Err(e)),
        );
        (sink, received)
    }

    /// Replays change metadata the way a consumer would.
    fn replay(state: &mut Vec<String>, changes: &[DocumentChange<i64>]) {
        for change in changes {
            match change.kind {
                ChangeType::Added => state.insert(change.new_index.unwrap(), change.document.id.clone()),
                ChangeType::Removed => {
                    let removed = state.remove(change.old_index.unwrap());
                    assert_eq!(removed, change.document.id);
                }
                ChangeType::Modified => {
                    let moved = state.remove(change.old_index.unwrap());
                    assert_eq!(moved, change.document.id);
                    state.insert(change.new_index.unwrap(), moved);
                }
            }
        }
    }

    fn ids(snapshot: &QuerySnapshot<i64>) -> Vec<String> {
        snapshot.documents.iter().map(|d| d.id.clone()).collect()
    }

    #[test]
    fn test_listen_delivers_initial_snapshot() {
        let coll = collection();
        coll.set("b", 2).unwrap();
        coll.set("a", 1).unwrap();

        let (sink, received) = recording_sink();
        let _handle = coll.listen(ListenOptions::default(), sink).unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let snap = received[0].as_ref().unwrap();
        assert_eq!(ids(snap), vec!["a", "b"]);
        assert!(snap.changes.iter().all(|c| c.kind == ChangeType::Added));
    }

    #[test]
    fn test_changes_replay_to_new_order() {
        let coll = collection();
        for (id, v) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            coll.set(id, v).unwrap();
        }

        let (sink, received) = recording_sink();
        let _handle = coll.listen(ListenOptions::default(), sink).unwrap();
        let mut replayed: Vec<String> = Vec::new();

        coll.update("a", 35).unwrap();
        coll.delete("c").unwrap();
        coll.set("e", 5).unwrap();
        coll.update("d", 1).unwrap();
        coll.set("f", 25).unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 6);
        for snap in received.iter() {
            let snap = snap.as_ref().unwrap();
            replay(&mut replayed, &snap.changes);
            assert_eq!(replayed, ids(snap));
        }
        assert_eq!(replayed, vec!["d", "e", "b", "f", "a"]);
    }

    #[test]
    fn test_modified_reports_both_indices() {
        let coll = collection();
        coll.set("a", 1).unwrap();
        coll.set("b", 2).unwrap();
        coll.set("c", 3).unwrap();

        let (sink, received) = recording_sink();
        let _handle = coll.listen(ListenOptions::default(), sink).unwrap();
        coll.update("a", 4).unwrap();

        let received = received.lock().unwrap();
        let snap = received[1].as_ref().unwrap();
        assert_eq!(snap.changes.len(), 1);
        let change = &snap.changes[0];
        assert_eq!(change.kind, ChangeType::Modified);
        assert_eq!(change.old_index, Some(0));
        assert_eq!(change.new_index, Some(2));
    }

    #[test]
    fn test_filter_turns_updates_into_add_and_remove() {
        let coll = InMemoryCollection::new("numbers").filtered(|v: &i64| *v > 0);
        coll.set("a", 1).unwrap();

        let (sink, received) = recording_sink();
        let _handle = coll.listen(ListenOptions::default(), sink).unwrap();
        coll.update("a", -1).unwrap();
        coll.update("a", 2).unwrap();
        coll.set("z", -5).unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 3, "non-matching write must not notify");
        assert_eq!(received[1].as_ref().unwrap().changes[0].kind, ChangeType::Removed);
        assert_eq!(received[2].as_ref().unwrap().changes[0].kind, ChangeType::Added);
    }

    #[test]
    fn test_metadata_only_changes_respect_listen_options() {
        let coll = collection();
        coll.set("a", 1).unwrap();

        let (with_meta, with_received) = recording_sink();
        let (without_meta, without_received) = recording_sink();
        let _h1 = coll
            .listen(ListenOptions { include_metadata_changes: true }, with_meta)
            .unwrap();
        let _h2 = coll.listen(ListenOptions::default(), without_meta).unwrap();

        coll.set_pending_writes("a", true).unwrap();

        assert_eq!(with_received.lock().unwrap().len(), 2);
        assert_eq!(without_received.lock().unwrap().len(), 1);

        let with_received = with_received.lock().unwrap();
        let snap = with_received[1].as_ref().unwrap();
        assert!(snap.changes.is_empty());
        assert!(snap.metadata.has_pending_writes);
        assert!(snap.documents[0].metadata.has_pending_writes);
    }

    #[test]
    fn test_cancel_unregisters_listener() {
        let coll = collection();
        let (sink, received) = recording_sink();
        let mut handle = coll.listen(ListenOptions::default(), sink).unwrap();
        assert_eq!(coll.listener_count().unwrap(), 1);

        handle.cancel();
        assert_eq!(coll.listener_count().unwrap(), 0);

        coll.set("a", 1).unwrap();
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_writers_deliver_replayable_changes() {
        let coll = collection();
        let (sink, received) = recording_sink();
        let _handle = coll.listen(ListenOptions::default(), sink).unwrap();

        std::thread::scope(|scope| {
            for t in 0..4_i64 {
                let coll = &coll;
                scope.spawn(move || {
                    for i in 0..50_i64 {
                        coll.set(format!("t{t}-{i}"), (i * 7 + t) % 23).unwrap();
                    }
                });
            }
        });

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 201);
        let mut replayed = Vec::new();
        for snapshot in received.iter() {
            let snapshot = snapshot.as_ref().unwrap();
            replay(&mut replayed, &snapshot.changes);
            assert_eq!(replayed, ids(snapshot));
        }
        assert_eq!(replayed.len(), 200);
    }

    #[test]
    fn test_fail_listeners_terminates() {
        let coll = collection();
        let (sink, received) = recording_sink();
        let _handle = coll.listen(ListenOptions::default(), sink).unwrap();

        coll.fail_listeners(&StoreError::unavailable("down")).unwrap();
        coll.set("a", 1).unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1], Err(StoreError::unavailable("down")));
        assert_eq!(coll.listener_count().unwrap(), 0);
    }

    #[test]
    fn test_update_missing_document() {
        let coll = collection();
        let err = coll.update("ghost", 1).unwrap_err();
        assert_eq!(
            err,
            StoreError::NotFound {
                path: "numbers/ghost".to_string()
            }
        );
        assert!(coll.delete("ghost").is_err());
    }

    #[test]
    fn test_get_respects_read_source() {
        let coll = collection();
        coll.set("a", 1).unwrap();

        let snap = futures::executor::block_on(coll.get(GetOptions::from_source(ReadSource::Cache))).unwrap();
        assert!(snap.metadata.from_cache);
        assert_eq!(snap.len(), 1);

        coll.set_from_cache(true).unwrap();
        let err = futures::executor::block_on(coll.get(GetOptions::from_source(ReadSource::Server))).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_add_generates_id() {
        let coll = collection();
        let doc = futures::executor::block_on(coll.add(7)).unwrap();
        assert_eq!(doc.parent(), "numbers");
        assert_eq!(coll.len().unwrap(), 1);
        assert_eq!(coll.matches().unwrap()[0].id, doc.id());
    }
}
