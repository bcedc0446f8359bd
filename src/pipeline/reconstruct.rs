//! Ordered state reconstructor.
//!
//! Replays change batches onto a private ordered sequence and re-emits the
//! whole sequence after each batch. Every structural change is applied, so
//! the internal order stays identical to the store's order. The event filter
//! only decides which documents are exposed in the emitted batch.

use std::collections::HashMap;

use crate::change::{ChangeRecord, ChangeType, EventFilter, NotificationBatch};
use crate::error::MalformedNotification;
use crate::snapshot::SnapshotMetadata;

#[derive(Debug, Clone)]
struct Entry<T> {
    id: String,
    document: T,
    metadata: SnapshotMetadata,
    /// Kind of the last change that touched this document.
    kind: ChangeType,
    touched: bool,
}

impl<T: Clone> Entry<T> {
    fn from_record(record: &ChangeRecord<T>) -> Self {
        Self {
            id: record.document_id().to_string(),
            document: record.document().clone(),
            metadata: record.metadata(),
            kind: record.kind(),
            touched: true,
        }
    }

    fn refresh(&mut self, record: &ChangeRecord<T>) {
        self.document = record.document().clone();
        self.metadata = record.metadata();
        self.kind = record.kind();
        self.touched = true;
    }
}

/// Per-subscription ordered view of a query's result set.
#[derive(Debug, Clone)]
pub struct OrderedStateReconstructor<T> {
    events: EventFilter,
    entries: Vec<Entry<T>>,
    /// Exposed (id, kind) sequence of the last emission; `None` before the first.
    emitted: Option<Vec<(String, ChangeType)>>,
}

impl<T: Clone> OrderedStateReconstructor<T> {
    /// Creates an empty reconstructor exposing `events` (normalized).
    #[must_use]
    pub fn new(events: EventFilter) -> Self {
        Self {
            events: events.normalized(),
            entries: Vec::new(),
            emitted: None,
        }
    }

    /// Length of the full internal sequence.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the internal sequence is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of the full internal sequence, in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Documents of the full internal sequence, in order.
    pub fn documents(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|e| &e.document)
    }

    /// Applies one batch in delivery order.
    ///
    /// Returns the new ordered snapshot, or `None` when the exposed view did
    /// not change. An error leaves the reconstructor in an unspecified state;
    /// callers must discard it.
    pub fn apply(
        &mut self,
        batch: &NotificationBatch<T>,
    ) -> Result<Option<NotificationBatch<T>>, MalformedNotification> {
        for entry in &mut self.entries {
            entry.touched = false;
        }
        for record in batch {
            self.apply_change(record)?;
        }
        Ok(self.snapshot_if_changed())
    }

    fn apply_change(&mut self, record: &ChangeRecord<T>) -> Result<(), MalformedNotification> {
        match record.kind() {
            ChangeType::Added => {
                let idx = required_index(record, record.new_index())?;
                if let Some(existing) = self.entries.get_mut(idx) {
                    if existing.id == record.document_id() {
                        // Re-delivery of a document already in place.
                        existing.refresh(record);
                        return Ok(());
                    }
                }
                if idx > self.entries.len() {
                    return Err(self.out_of_range(record, idx));
                }
                self.entries.insert(idx, Entry::from_record(record));
            }
            ChangeType::Removed => {
                let idx = required_index(record, record.old_index())?;
                self.check_slot(record, idx)?;
                self.entries.remove(idx);
            }
            ChangeType::Modified => {
                let old = required_index(record, record.old_index())?;
                let new = required_index(record, record.new_index())?;
                self.check_slot(record, old)?;
                if old == new {
                    self.entries[old].refresh(record);
                    return Ok(());
                }
                let mut entry = self.entries.remove(old);
                if new > self.entries.len() {
                    return Err(self.out_of_range(record, new));
                }
                entry.refresh(record);
                self.entries.insert(new, entry);
            }
        }
        Ok(())
    }

    fn check_slot(&self, record: &ChangeRecord<T>, idx: usize) -> Result<(), MalformedNotification> {
        match self.entries.get(idx) {
            None => Err(self.out_of_range(record, idx)),
            Some(entry) if entry.id != record.document_id() => Err(MalformedNotification::DocumentMismatch {
                kind: record.kind(),
                document_id: record.document_id().to_string(),
                index: idx,
                found: entry.id.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn out_of_range(&self, record: &ChangeRecord<T>, index: usize) -> MalformedNotification {
        MalformedNotification::IndexOutOfRange {
            kind: record.kind(),
            document_id: record.document_id().to_string(),
            index,
            len: self.entries.len(),
        }
    }

    fn snapshot_if_changed(&mut self) -> Option<NotificationBatch<T>> {
        let exposed: Vec<&Entry<T>> = self
            .entries
            .iter()
            .filter(|entry| self.events.contains(entry.kind))
            .collect();
        let keys: Vec<(String, ChangeType)> = exposed.iter().map(|e| (e.id.clone(), e.kind)).collect();

        let changed = match &self.emitted {
            None => true,
            Some(previous) => previous != &keys || exposed.iter().any(|e| e.touched),
        };
        if !changed {
            return None;
        }

        let previous_positions: HashMap<&str, usize> = self
            .emitted
            .iter()
            .flatten()
            .enumerate()
            .map(|(idx, (id, _))| (id.as_str(), idx))
            .collect();

        let batch = exposed
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                ChangeRecord::new(
                    entry.kind,
                    entry.id.clone(),
                    entry.document.clone(),
                    previous_positions.get(entry.id.as_str()).copied(),
                    Some(idx),
                    entry.metadata,
                )
            })
            .collect();

        self.emitted = Some(keys);
        Some(batch)
    }
}

fn required_index<T>(record: &ChangeRecord<T>, index: Option<usize>) -> Result<usize, MalformedNotification> {
    index.ok_or_else(|| MalformedNotification::InconsistentIndices {
        kind: record.kind(),
        document_id: record.document_id().to_string(),
        old_index: record.old_index(),
        new_index: record.new_index(),
    })
}
