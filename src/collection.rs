//! Live views over a queried collection.
//!
//! `LiveCollection` is the consumer-facing surface. Each view call builds an
//! independent subscription: its own store listener, its own diff emitter and,
//! for the ordered view, its own reconstructor. Every streaming view is gated
//! by the configured `StabilityCoordinator`.

use std::fmt;
use std::sync::Arc;

use async_stream::stream;
use futures::future;
use futures::stream::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::change::{AuditLog, EventFilter, NotificationBatch};
use crate::config::LiveQueryConfig;
use crate::error::{LiveQueryError, LiveResult};
use crate::pipeline::{project_values, ChangeDiffEmitter, OrderedStateReconstructor};
use crate::snapshot::QueryResult;
use crate::source::{DocumentRef, GetOptions, ListenOptions, QuerySource};
use crate::stability::{keep_unstable_until_first, NoopCoordinator, StabilityCoordinator};
use crate::stream::{self as bridge, LiveStream, SubscriptionId};

/// Options for the `values` view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuesOptions {
    /// Field that receives each document's id.
    pub id_field: Option<String>,
}

impl ValuesOptions {
    /// Writes document ids into `field`.
    #[must_use]
    pub fn with_id_field(field: impl Into<String>) -> Self {
        Self {
            id_field: Some(field.into()),
        }
    }
}

/// Live views over one query.
pub struct LiveCollection<T> {
    source: Arc<dyn QuerySource<T>>,
    coordinator: Arc<dyn StabilityCoordinator>,
    config: LiveQueryConfig,
}

impl<T> Clone for LiveCollection<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            coordinator: Arc::clone(&self.coordinator),
            config: self.config.clone(),
        }
    }
}

impl<T> fmt::Debug for LiveCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveCollection")
            .field("path", &self.source.path())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T> LiveCollection<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wraps a store query with the default configuration and no stability
    /// coordination.
    pub fn new(source: impl QuerySource<T> + 'static) -> Self {
        Self::from_shared(Arc::new(source))
    }

    /// Wraps an already shared store query.
    #[must_use]
    pub fn from_shared(source: Arc<dyn QuerySource<T>>) -> Self {
        Self {
            source,
            coordinator: Arc::new(NoopCoordinator),
            config: LiveQueryConfig::default(),
        }
    }

    /// Gates every streaming view through `coordinator`.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<dyn StabilityCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Replaces the configuration used by views built afterwards.
    #[must_use]
    pub fn with_config(mut self, config: LiveQueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Path of the queried collection.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        self.source.path()
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &LiveQueryConfig {
        &self.config
    }

    /// Change batches as reported by the store, keeping only `events`.
    ///
    /// Notifications with no remaining records are skipped.
    pub fn raw_changes(&self, events: EventFilter) -> LiveStream<NotificationBatch<T>> {
        let subscription = SubscriptionId::new();
        self.gated(self.filtered_changes(events, subscription, "raw_changes"))
    }

    /// Cumulative log of every record `raw_changes(events)` would emit.
    pub fn audit_log(&self, events: EventFilter) -> LiveStream<AuditLog<T>> {
        let subscription = SubscriptionId::new();
        let logs = self
            .filtered_changes(events, subscription, "audit_log")
            .scan(AuditLog::new(), |log, batch| {
                let item = batch.map(|batch| {
                    log.append(batch);
                    log.clone()
                });
                future::ready(Some(item))
            });
        self.gated(logs)
    }

    /// Full result set in store order after each notification.
    ///
    /// Only documents whose latest change kind is in `events` are exposed;
    /// the underlying order always reflects every change.
    pub fn ordered_snapshot(&self, events: EventFilter) -> LiveStream<NotificationBatch<T>> {
        let subscription = SubscriptionId::new();
        let mut reconstructor = OrderedStateReconstructor::new(self.config.resolve_events(events));
        let mut batches = self.notifications(subscription, "ordered_snapshot");

        let snapshots = stream! {
            while let Some(batch) = batches.next().await {
                let batch = match batch {
                    Ok(batch) => batch,
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                };
                match reconstructor.apply(&batch) {
                    Ok(Some(snapshot)) => {
                        trace!(subscription = %subscription, documents = snapshot.len(), "ordered snapshot");
                        yield Ok(snapshot);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(subscription = %subscription, document = error.document_id(), %error, "malformed notification ended subscription");
                        yield Err(error.into());
                        break;
                    }
                }
            }
        };
        self.gated(snapshots)
    }

    /// Current match list as plain JSON values, one emission per notification.
    ///
    /// Metadata-only notifications are never requested: the projection
    /// carries no metadata, so they would repeat the previous emission.
    pub fn values(&self, options: ValuesOptions) -> LiveStream<Vec<serde_json::Value>>
    where
        T: Serialize,
    {
        let subscription = SubscriptionId::new();
        let mut snapshots = bridge::listen(
            Arc::clone(&self.source),
            ListenOptions {
                include_metadata_changes: false,
            },
            subscription,
            "values",
        );

        let values = stream! {
            while let Some(snapshot) = snapshots.next().await {
                let projected = snapshot.and_then(|snapshot| {
                    project_values(&snapshot.documents, options.id_field.as_deref())
                });
                let failed = projected.is_err();
                yield projected;
                if failed {
                    break;
                }
            }
        };
        self.gated(values)
    }

    /// One-shot read of the current result set.
    pub async fn get_once(&self, options: GetOptions) -> LiveResult<QueryResult<T>> {
        debug!(path = self.source.path(), source = ?options.source, "one-shot read");
        let snapshot = self.source.get(options).await?;
        Ok(snapshot.into())
    }

    /// Adds `data` under a generated id.
    pub async fn add_document(&self, data: T) -> LiveResult<DocumentRef> {
        let doc = self.source.add(data).await?;
        debug!(document = %doc, "document added");
        Ok(doc)
    }

    /// Reference to a document of this collection; `None` generates an id.
    #[must_use]
    pub fn document(&self, id: Option<&str>) -> DocumentRef {
        self.source.doc(id)
    }

    /// Store notifications mapped to change batches. Ends after the first error.
    fn notifications(&self, subscription: SubscriptionId, view: &'static str) -> LiveStream<NotificationBatch<T>> {
        let mut emitter = ChangeDiffEmitter::new(self.config.include_metadata_changes);
        let mut snapshots = bridge::listen(
            Arc::clone(&self.source),
            self.config.listen_options(),
            subscription,
            view,
        );

        stream! {
            while let Some(snapshot) = snapshots.next().await {
                let snapshot = match snapshot {
                    Ok(snapshot) => snapshot,
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                };
                match emitter.emit(&snapshot) {
                    Ok(batch) => {
                        trace!(subscription = %subscription, view, records = batch.len(), "notification");
                        yield Ok(batch);
                    }
                    Err(error) => {
                        warn!(subscription = %subscription, view, document = error.document_id(), %error, "malformed notification ended subscription");
                        yield Err(LiveQueryError::from(error));
                        break;
                    }
                }
            }
        }
        .boxed()
    }

    fn filtered_changes(
        &self,
        events: EventFilter,
        subscription: SubscriptionId,
        view: &'static str,
    ) -> LiveStream<NotificationBatch<T>> {
        let events = self.config.resolve_events(events);
        self.notifications(subscription, view)
            .map_ok(move |batch| batch.filter(events))
            .try_filter(|batch| future::ready(!batch.is_empty()))
            .boxed()
    }

    fn gated<I>(&self, inner: impl futures::Stream<Item = LiveResult<I>> + Send + 'static) -> LiveStream<I>
    where
        I: Send + 'static,
    {
        keep_unstable_until_first(inner, Arc::clone(&self.coordinator))
    }
}
