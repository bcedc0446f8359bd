//! Wire-level shapes delivered by the store's live query listener.
//!
//! Each notification is a `QuerySnapshot`: the full current match list plus
//! per-document change metadata describing what happened since the previous
//! notification on the same listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::ChangeType;

/// Synchronization state attached to snapshots and documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Local writes have not been acknowledged by the backend yet.
    pub has_pending_writes: bool,
    /// Data was served from the local cache rather than the backend.
    pub from_cache: bool,
}

impl SnapshotMetadata {
    /// Builds metadata from its two flags.
    #[must_use]
    pub const fn new(has_pending_writes: bool, from_cache: bool) -> Self {
        Self {
            has_pending_writes,
            from_cache,
        }
    }
}

/// One document as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot<T> {
    /// Document id, unique within the collection.
    pub id: String,
    /// Document data.
    pub data: T,
    /// Sync state of this document.
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

impl<T> DocumentSnapshot<T> {
    /// Document with default metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            data,
            metadata: SnapshotMetadata::default(),
        }
    }

    /// Replaces the document's metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: SnapshotMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Store-supplied change metadata for one document.
///
/// Indices follow the store's contract: each one is valid against the result
/// set as it stands after every earlier change in the same notification has
/// been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange<T> {
    /// Kind of change.
    pub kind: ChangeType,
    /// Document as of this change.
    pub document: DocumentSnapshot<T>,
    /// Position before the change; `None` when added.
    pub old_index: Option<usize>,
    /// Position after the change; `None` when removed.
    pub new_index: Option<usize>,
}

impl<T> DocumentChange<T> {
    /// Change adding `document` at `new_index`.
    #[must_use]
    pub fn added(document: DocumentSnapshot<T>, new_index: usize) -> Self {
        Self {
            kind: ChangeType::Added,
            document,
            old_index: None,
            new_index: Some(new_index),
        }
    }

    /// Change removing `document` from `old_index`.
    #[must_use]
    pub fn removed(document: DocumentSnapshot<T>, old_index: usize) -> Self {
        Self {
            kind: ChangeType::Removed,
            document,
            old_index: Some(old_index),
            new_index: None,
        }
    }

    /// Change moving or updating `document` between the two positions.
    #[must_use]
    pub fn modified(document: DocumentSnapshot<T>, old_index: usize, new_index: usize) -> Self {
        Self {
            kind: ChangeType::Modified,
            document,
            old_index: Some(old_index),
            new_index: Some(new_index),
        }
    }

    /// Id of the changed document.
    #[inline]
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document.id
    }
}

/// One live query notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySnapshot<T> {
    /// Current match list in query order.
    pub documents: Vec<DocumentSnapshot<T>>,
    /// Changes since the previous notification, in store order.
    pub changes: Vec<DocumentChange<T>>,
    /// Snapshot-level sync state.
    #[serde(default)]
    pub metadata: SnapshotMetadata,
    /// When the snapshot was read.
    pub read_time: DateTime<Utc>,
}

impl<T> QuerySnapshot<T> {
    /// Builds a snapshot read now with default metadata.
    #[must_use]
    pub fn new(documents: Vec<DocumentSnapshot<T>>, changes: Vec<DocumentChange<T>>) -> Self {
        Self {
            documents,
            changes,
            metadata: SnapshotMetadata::default(),
            read_time: Utc::now(),
        }
    }

    /// Replaces the snapshot-level metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: SnapshotMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Number of matching documents.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when nothing matches.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl<T: Clone> QuerySnapshot<T> {
    /// The first notification of a listener: every match reported as added.
    #[must_use]
    pub fn initial(documents: Vec<DocumentSnapshot<T>>) -> Self {
        let changes = documents
            .iter()
            .enumerate()
            .map(|(idx, doc)| DocumentChange::added(doc.clone(), idx))
            .collect();
        Self::new(documents, changes)
    }
}

/// Result of a one-shot read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult<T> {
    documents: Vec<DocumentSnapshot<T>>,
    metadata: SnapshotMetadata,
    read_time: DateTime<Utc>,
}

impl<T> QueryResult<T> {
    /// Number of documents read.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when the read matched nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Documents in query order.
    #[must_use]
    pub fn documents(&self) -> &[DocumentSnapshot<T>] {
        &self.documents
    }

    /// Document ids in query order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|doc| doc.id.as_str())
    }

    /// Sync state of the read.
    #[must_use]
    pub const fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    /// When the read happened.
    #[must_use]
    pub const fn read_time(&self) -> DateTime<Utc> {
        self.read_time
    }

    /// Consumes the result, returning its documents.
    #[must_use]
    pub fn into_documents(self) -> Vec<DocumentSnapshot<T>> {
        self.documents
    }
}

impl<T> From<QuerySnapshot<T>> for QueryResult<T> {
    fn from(snapshot: QuerySnapshot<T>) -> Self {
        Self {
            documents: snapshot.documents,
            metadata: snapshot.metadata,
            read_time: snapshot.read_time,
        }
    }
}
