//! # livequery - Ordered change streams over document-store live queries
//!
//! livequery turns the snapshot listener of a document store into typed,
//! per-subscription async streams. Each view owns its listener and its state,
//! and is torn down when the stream is dropped.
//!
//! ## Views
//!
//! - **raw_changes**: change batches in store order, filtered by kind
//! - **audit_log**: the cumulative record of every filtered change
//! - **ordered_snapshot**: the full result set in store order after each notification
//! - **values**: the match list as plain JSON values
//!
//! One-shot reads and writes (`get_once`, `add_document`, `document`) pass
//! straight through to the store.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use livequery::{EventFilter, InMemoryCollection, LiveCollection};
//!
//! let store = InMemoryCollection::new("tasks").ordered_by(|a: &i64, b: &i64| a.cmp(b));
//! let live = LiveCollection::new(store.clone());
//!
//! let mut snapshots = live.ordered_snapshot(EventFilter::empty());
//! store.set("a", 3)?;
//! while let Some(batch) = snapshots.next().await {
//!     println!("{:?}", batch?.ids().collect::<Vec<_>>());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod change;
pub mod config;
pub mod error;
pub mod snapshot;

// Store boundary
pub mod source;

// Pipeline and views
pub mod collection;
pub mod pipeline;
pub mod stability;
pub mod stream;

// Re-export primary types at crate root for convenience
pub use change::{AuditLog, ChangeRecord, ChangeType, EventFilter, NotificationBatch};
pub use collection::{LiveCollection, ValuesOptions};
pub use config::LiveQueryConfig;
pub use error::{LiveQueryError, LiveResult, MalformedNotification, StoreError};
pub use snapshot::{DocumentChange, DocumentSnapshot, QueryResult, QuerySnapshot, SnapshotMetadata};
pub use source::{
    DocumentRef, GetOptions, InMemoryCollection, ListenOptions, ListenerHandle, QuerySource, ReadSource,
    SnapshotSink,
};
pub use stability::{keep_unstable_until_first, NoopCoordinator, PendingCounter, PendingTask, StabilityCoordinator};
pub use stream::{LiveStream, SubscriptionId};
