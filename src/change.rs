//! Change records produced by the live query pipeline.
//!
//! A `ChangeRecord` describes one structural event for one document. A
//! `NotificationBatch` groups the records derived from a single store
//! notification, and an `AuditLog` accumulates records across a subscription.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotMetadata;

/// Kind of structural change reported for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// The document started matching the query.
    Added,
    /// The document still matches but its data (or position) changed.
    Modified,
    /// The document no longer matches the query.
    Removed,
}

impl ChangeType {
    /// All change types, in declaration order.
    pub const ALL: [Self; 3] = [Self::Added, Self::Modified, Self::Removed];

    const fn bit(self) -> u8 {
        match self {
            Self::Added => 0b001,
            Self::Modified => 0b010,
            Self::Removed => 0b100,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of change types a view should expose.
///
/// An empty filter means "no preference" and normalizes to all three types.
/// Explicitly listing all three is equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ChangeType>", into = "Vec<ChangeType>")]
pub struct EventFilter {
    bits: u8,
}

impl EventFilter {
    /// Filter accepting every change type.
    #[must_use]
    pub const fn all() -> Self {
        Self { bits: 0b111 }
    }

    /// Filter with no explicit selection.
    #[must_use]
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Filter accepting a single change type.
    #[must_use]
    pub const fn only(kind: ChangeType) -> Self {
        Self { bits: kind.bit() }
    }

    /// Returns a copy that also accepts `kind`.
    #[must_use]
    pub const fn with(self, kind: ChangeType) -> Self {
        Self {
            bits: self.bits | kind.bit(),
        }
    }

    /// True when no kind is selected.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Returns true if `kind` passes this filter.
    ///
    /// An empty filter passes nothing; call `normalized` first where the
    /// default-to-all rule applies.
    #[must_use]
    pub const fn contains(self, kind: ChangeType) -> bool {
        self.bits & kind.bit() != 0
    }

    /// Resolves the empty filter to all three change types.
    #[must_use]
    pub const fn normalized(self) -> Self {
        if self.is_empty() {
            Self::all()
        } else {
            self
        }
    }

    /// Iterates the selected change types in declaration order.
    pub fn iter(self) -> impl Iterator<Item = ChangeType> {
        ChangeType::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<ChangeType> for EventFilter {
    fn from_iter<I: IntoIterator<Item = ChangeType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<&[ChangeType]> for EventFilter {
    fn from(kinds: &[ChangeType]) -> Self {
        kinds.iter().copied().collect()
    }
}

impl From<Vec<ChangeType>> for EventFilter {
    fn from(kinds: Vec<ChangeType>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<EventFilter> for Vec<ChangeType> {
    fn from(filter: EventFilter) -> Self {
        filter.iter().collect()
    }
}

impl From<ChangeType> for EventFilter {
    fn from(kind: ChangeType) -> Self {
        Self::only(kind)
    }
}

/// One structural event tied to a document and its before/after position.
///
/// `old_index` is `None` for additions and `new_index` is `None` for removals.
/// Records are immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord<T> {
    kind: ChangeType,
    document_id: String,
    document: T,
    old_index: Option<usize>,
    new_index: Option<usize>,
    #[serde(default)]
    metadata: SnapshotMetadata,
}

impl<T> ChangeRecord<T> {
    /// Builds a record from its parts.
    #[must_use]
    pub fn new(
        kind: ChangeType,
        document_id: impl Into<String>,
        document: T,
        old_index: Option<usize>,
        new_index: Option<usize>,
        metadata: SnapshotMetadata,
    ) -> Self {
        Self {
            kind,
            document_id: document_id.into(),
            document,
            old_index,
            new_index,
            metadata,
        }
    }

    /// A document that entered the result set at `new_index`.
    #[must_use]
    pub fn added(document_id: impl Into<String>, document: T, new_index: usize) -> Self {
        Self::new(
            ChangeType::Added,
            document_id,
            document,
            None,
            Some(new_index),
            SnapshotMetadata::default(),
        )
    }

    /// A document that left the result set from `old_index`.
    #[must_use]
    pub fn removed(document_id: impl Into<String>, document: T, old_index: usize) -> Self {
        Self::new(
            ChangeType::Removed,
            document_id,
            document,
            Some(old_index),
            None,
            SnapshotMetadata::default(),
        )
    }

    /// A document that changed and moved from `old_index` to `new_index`.
    #[must_use]
    pub fn modified(
        document_id: impl Into<String>,
        document: T,
        old_index: usize,
        new_index: usize,
    ) -> Self {
        Self::new(
            ChangeType::Modified,
            document_id,
            document,
            Some(old_index),
            Some(new_index),
            SnapshotMetadata::default(),
        )
    }

    /// Returns a copy carrying `metadata`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: SnapshotMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Kind of change.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ChangeType {
        self.kind
    }

    /// Id of the changed document.
    #[inline]
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Document data as of this change.
    #[inline]
    #[must_use]
    pub const fn document(&self) -> &T {
        &self.document
    }

    /// Position before the change; `None` for added documents.
    #[inline]
    #[must_use]
    pub const fn old_index(&self) -> Option<usize> {
        self.old_index
    }

    /// Position after the change; `None` for removed documents.
    #[inline]
    #[must_use]
    pub const fn new_index(&self) -> Option<usize> {
        self.new_index
    }

    /// Sync state of the document as of this change.
    #[inline]
    #[must_use]
    pub const fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    /// Consumes the record, returning the document.
    #[must_use]
    pub fn into_document(self) -> T {
        self.document
    }
}

/// Ordered records derived from a single store notification.
///
/// Record order is the order in which the store reported the changes. For
/// the ordered snapshot view it is the result set order instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationBatch<T> {
    records: Vec<ChangeRecord<T>>,
}

impl<T> Default for NotificationBatch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NotificationBatch<T> {
    /// Creates an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Number of records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the batch holds no records.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in batch order.
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[ChangeRecord<T>] {
        &self.records
    }

    /// Iterates the records in batch order.
    pub fn iter(&self) -> std::slice::Iter<'_, ChangeRecord<T>> {
        self.records.iter()
    }

    /// Keeps only the records whose type passes `events` (normalized).
    #[must_use]
    pub fn filter(self, events: EventFilter) -> Self {
        let events = events.normalized();
        Self {
            records: self
                .records
                .into_iter()
                .filter(|record| events.contains(record.kind))
                .collect(),
        }
    }

    /// Document ids in record order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(ChangeRecord::document_id)
    }

    /// Documents in record order.
    pub fn documents(&self) -> impl Iterator<Item = &T> {
        self.records.iter().map(ChangeRecord::document)
    }

    /// Consumes the batch, returning its records.
    #[must_use]
    pub fn into_records(self) -> Vec<ChangeRecord<T>> {
        self.records
    }
}

impl<T> From<Vec<ChangeRecord<T>>> for NotificationBatch<T> {
    fn from(records: Vec<ChangeRecord<T>>) -> Self {
        Self { records }
    }
}

impl<T> FromIterator<ChangeRecord<T>> for NotificationBatch<T> {
    fn from_iter<I: IntoIterator<Item = ChangeRecord<T>>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for NotificationBatch<T> {
    type Item = ChangeRecord<T>;
    type IntoIter = std::vec::IntoIter<ChangeRecord<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a NotificationBatch<T> {
    type Item = &'a ChangeRecord<T>;
    type IntoIter = std::slice::Iter<'a, ChangeRecord<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Append-only log of every record seen on one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog<T> {
    records: Vec<ChangeRecord<T>>,
}

impl<T> Default for AuditLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AuditLog<T> {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Appends every record of `batch`, preserving its order.
    pub fn append(&mut self, batch: NotificationBatch<T>) {
        self.records.extend(batch.records);
    }

    /// Number of records logged so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True until the first record is appended.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record, oldest first.
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[ChangeRecord<T>] {
        &self.records
    }

    /// Iterates the records, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, ChangeRecord<T>> {
        self.records.iter()
    }
}
