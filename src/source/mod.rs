//! Document store boundary.
//!
//! The pipeline consumes a store through `QuerySource`. A source pushes
//! `QuerySnapshot`s into a `SnapshotSink` one at a time, never re-entrantly,
//! and hands back a `ListenerHandle` that unregisters the listener.
//! Reads and writes are thin pass-throughs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::snapshot::QuerySnapshot;

/// Embedded reference store.
pub mod memory;

pub use memory::InMemoryCollection;

/// Options passed to the store when a listener is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListenOptions {
    /// Deliver notifications when only snapshot metadata changed.
    pub include_metadata_changes: bool,
}

/// Where a one-shot read is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    /// Backend when reachable, cache otherwise.
    #[default]
    Default,
    /// Backend only; fails when offline.
    Server,
    /// Local cache only.
    Cache,
}

/// Options for a one-shot read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetOptions {
    /// Where the read is served from.
    pub source: ReadSource,
}

impl GetOptions {
    /// Reads from `source`.
    #[must_use]
    pub const fn from_source(source: ReadSource) -> Self {
        Self { source }
    }
}

/// Reference to a single document in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    collection: String,
    id: String,
}

impl DocumentRef {
    /// Reference to document `id` of `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Document id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the collection holding this document.
    #[inline]
    #[must_use]
    pub fn parent(&self) -> &str {
        &self.collection
    }

    /// Full `collection/id` path.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Generates a fresh document id.
#[must_use]
pub fn auto_id() -> String {
    Uuid::new_v4().simple().to_string()
}

type SnapshotCallback<T> = dyn Fn(QuerySnapshot<T>) + Send + Sync;
type ErrorCallback = dyn Fn(StoreError) + Send + Sync;

/// Receiver side of a store listener.
///
/// Wraps the `on_snapshot` / `on_error` callback pair. The error callback runs
/// at most once; after it has run, further deliveries are ignored.
pub struct SnapshotSink<T> {
    on_snapshot: Arc<SnapshotCallback<T>>,
    on_error: Arc<ErrorCallback>,
    failed: Arc<AtomicBool>,
}

impl<T> Clone for SnapshotSink<T> {
    fn clone(&self) -> Self {
        Self {
            on_snapshot: Arc::clone(&self.on_snapshot),
            on_error: Arc::clone(&self.on_error),
            failed: Arc::clone(&self.failed),
        }
    }
}

impl<T> fmt::Debug for SnapshotSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotSink")
            .field("failed", &self.is_failed())
            .finish_non_exhaustive()
    }
}

impl<T> SnapshotSink<T> {
    /// Sink forwarding notifications to `on_snapshot` and the terminal error to `on_error`.
    pub fn new<S, E>(on_snapshot: S, on_error: E) -> Self
    where
        S: Fn(QuerySnapshot<T>) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        Self {
            on_snapshot: Arc::new(on_snapshot),
            on_error: Arc::new(on_error),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delivers one notification.
    pub fn notify(&self, snapshot: QuerySnapshot<T>) {
        if !self.is_failed() {
            (self.on_snapshot)(snapshot);
        }
    }

    /// Terminates the listener with `error`. Only the first call is delivered.
    pub fn fail(&self, error: StoreError) {
        if !self.failed.swap(true, Ordering::AcqRel) {
            (self.on_error)(error);
        }
    }

    /// True once `fail` has been called.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Cancellation handle for a store listener.
///
/// Dropping the handle cancels the listener as well.
pub struct ListenerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    /// Handle running `cancel` once, on `cancel()` or drop.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unregisters the listener. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// True once the listener has been unregistered.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A live query against a document store.
///
/// Implementations own transport, retries and authentication. The pipeline
/// only relies on the notification contract described on `QuerySnapshot`.
pub trait QuerySource<T>: Send + Sync {
    /// Path of the queried collection.
    fn path(&self) -> &str;

    /// Opens a listener. The first notification lists every current match
    /// as added.
    fn listen(&self, options: ListenOptions, sink: SnapshotSink<T>) -> Result<ListenerHandle, StoreError>;

    /// One-shot fetch; no listener is retained.
    fn get(&self, options: GetOptions) -> BoxFuture<'static, Result<QuerySnapshot<T>, StoreError>>;

    /// Adds a document under a generated id.
    fn add(&self, data: T) -> BoxFuture<'static, Result<DocumentRef, StoreError>>;

    /// Reference to a document; a fresh id is generated when `id` is `None`.
    fn doc(&self, id: Option<&str>) -> DocumentRef {
        let id = id.map_or_else(auto_id, str::to_string);
        DocumentRef::new(self.path(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn test_sink_error_delivered_once() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let snapshots = Arc::new(AtomicUsize::new(0));

        let errors_clone = Arc::clone(&errors);
        let snapshots_clone = Arc::clone(&snapshots);
        let sink: SnapshotSink<i32> = SnapshotSink::new(
            move |_| {
                snapshots_clone.fetch_add(1, Ordering::SeqCst);
            },
            move |e| errors_clone.lock().unwrap().push(e),
        );

        sink.notify(QuerySnapshot::initial(Vec::new()));
        sink.fail(StoreError::unavailable("first"));
        sink.fail(StoreError::unavailable("second"));
        sink.notify(QuerySnapshot::initial(Vec::new()));

        assert!(sink.is_failed());
        assert_eq!(snapshots.load(Ordering::SeqCst), 1);
        assert_eq!(*errors.lock().unwrap(), vec![StoreError::unavailable("first")]);
    }

    #[test]
    fn test_listener_handle_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let mut handle = ListenerHandle::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        drop(handle);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_handle_cancels_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        {
            let _handle = ListenerHandle::new(move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_document_ref_paths() {
        let doc = DocumentRef::new("tasks", "a1");
        assert_eq!(doc.id(), "a1");
        assert_eq!(doc.parent(), "tasks");
        assert_eq!(doc.path(), "tasks/a1");
        assert_eq!(doc.to_string(), "tasks/a1");
    }

    #[test]
    fn test_auto_id_is_unique() {
        let a = auto_id();
        let b = auto_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
