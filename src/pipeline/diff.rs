//! Change diff emitter.
//!
//! Maps one store notification into a `NotificationBatch`, keeping the
//! store's reporting order. When metadata changes are enabled, documents
//! whose own sync state changed since the previous notification are appended
//! as in-place modifications, whatever the snapshot-level metadata says.

use std::collections::HashMap;

use crate::change::{ChangeRecord, ChangeType, NotificationBatch};
use crate::error::MalformedNotification;
use crate::snapshot::{DocumentChange, QuerySnapshot, SnapshotMetadata};

#[derive(Debug, Clone, Default)]
struct PreviousSnapshot {
    documents: HashMap<String, SnapshotMetadata>,
}

impl PreviousSnapshot {
    fn capture<T>(snapshot: &QuerySnapshot<T>) -> Self {
        Self {
            documents: snapshot
                .documents
                .iter()
                .map(|doc| (doc.id.clone(), doc.metadata))
                .collect(),
        }
    }
}

/// Per-subscription diff emitter.
#[derive(Debug, Clone, Default)]
pub struct ChangeDiffEmitter {
    include_metadata_changes: bool,
    previous: Option<PreviousSnapshot>,
}

impl ChangeDiffEmitter {
    /// Creates an emitter; `include_metadata_changes` enables in-place
    /// records for sync-state changes.
    #[must_use]
    pub fn new(include_metadata_changes: bool) -> Self {
        Self {
            include_metadata_changes,
            previous: None,
        }
    }

    /// Produces the batch for one notification.
    pub fn emit<T: Clone>(
        &mut self,
        snapshot: &QuerySnapshot<T>,
    ) -> Result<NotificationBatch<T>, MalformedNotification> {
        let mut records = snapshot
            .changes
            .iter()
            .map(record_from_change)
            .collect::<Result<Vec<_>, _>>()?;

        if self.include_metadata_changes {
            if let Some(previous) = &self.previous {
                records.extend(metadata_changes(previous, snapshot));
            }
        }

        self.previous = Some(PreviousSnapshot::capture(snapshot));
        Ok(records.into())
    }
}

fn record_from_change<T: Clone>(change: &DocumentChange<T>) -> Result<ChangeRecord<T>, MalformedNotification> {
    let consistent = match change.kind {
        ChangeType::Added => change.old_index.is_none() && change.new_index.is_some(),
        ChangeType::Removed => change.old_index.is_some() && change.new_index.is_none(),
        ChangeType::Modified => change.old_index.is_some() && change.new_index.is_some(),
    };
    if !consistent {
        return Err(MalformedNotification::InconsistentIndices {
            kind: change.kind,
            document_id: change.document.id.clone(),
            old_index: change.old_index,
            new_index: change.new_index,
        });
    }

    Ok(ChangeRecord::new(
        change.kind,
        change.document.id.clone(),
        change.document.data.clone(),
        change.old_index,
        change.new_index,
        change.document.metadata,
    ))
}

/// In-place modifications for documents whose sync state changed.
///
/// A document counts as unchanged when its metadata equals the copy carried
/// by its own change in this notification, or, without one, the metadata it
/// had in the previous notification.
fn metadata_changes<T: Clone>(previous: &PreviousSnapshot, snapshot: &QuerySnapshot<T>) -> Vec<ChangeRecord<T>> {
    let changed: HashMap<&str, SnapshotMetadata> = snapshot
        .changes
        .iter()
        .map(|change| (change.document_id(), change.document.metadata))
        .collect();

    snapshot
        .documents
        .iter()
        .enumerate()
        .filter(|(_, doc)| {
            let before = changed
                .get(doc.id.as_str())
                .or_else(|| previous.documents.get(&doc.id));
            before != Some(&doc.metadata)
        })
        .map(|(idx, doc)| {
            ChangeRecord::modified(doc.id.clone(), doc.data.clone(), idx, idx).with_metadata(doc.metadata)
        })
        .collect()
}
