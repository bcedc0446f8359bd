//! Bridge from a store listener to an async stream.

use std::fmt;
use std::sync::Arc;

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LiveQueryError, LiveResult, StoreError};
use crate::snapshot::QuerySnapshot;
use crate::source::{ListenOptions, ListenerHandle, QuerySource, SnapshotSink};

/// Stream type returned by every live view.
pub type LiveStream<I> = BoxStream<'static, LiveResult<I>>;

/// Identifier of a single view subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cancels the store listener when the stream is dropped.
struct ListenerGuard {
    handle: ListenerHandle,
    subscription: SubscriptionId,
    view: &'static str,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.handle.cancel();
        debug!(subscription = %self.subscription, view = self.view, "listener closed");
    }
}

/// Opens a listener on first poll and yields its notifications.
///
/// A store error is yielded once and ends the stream. Dropping the stream
/// cancels the listener and discards anything still queued.
pub(crate) fn listen<T>(
    source: Arc<dyn QuerySource<T>>,
    options: ListenOptions,
    subscription: SubscriptionId,
    view: &'static str,
) -> LiveStream<QuerySnapshot<T>>
where
    T: Send + 'static,
{
    stream! {
        let (tx, rx) = mpsc::unbounded_channel::<Result<QuerySnapshot<T>, StoreError>>();
        let error_tx = tx.clone();
        let sink = SnapshotSink::new(
            move |snapshot| {
                let _ = tx.send(Ok(snapshot));
            },
            move |error| {
                let _ = error_tx.send(Err(error));
            },
        );

        let handle = match source.listen(options, sink) {
            Ok(handle) => handle,
            Err(error) => {
                warn!(subscription = %subscription, view, path = source.path(), %error, "listener failed to open");
                yield Err(LiveQueryError::from(error));
                return;
            }
        };
        let _guard = ListenerGuard { handle, subscription, view };
        debug!(subscription = %subscription, view, path = source.path(), "listener opened");

        let mut notifications = UnboundedReceiverStream::new(rx);
        while let Some(notification) = notifications.next().await {
            match notification {
                Ok(snapshot) => yield Ok(snapshot),
                Err(error) => {
                    warn!(subscription = %subscription, view, %error, "store error ended subscription");
                    yield Err(error.into());
                    break;
                }
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::DocumentSnapshot;
    use crate::source::InMemoryCollection;
    use futures::FutureExt;

    #[test]
    fn test_subscription_id_display_is_uuid() {
        let uuid = Uuid::new_v4();
        let id = SubscriptionId::from_uuid(uuid);
        assert_eq!(id.to_string(), uuid.to_string());
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }

    #[tokio::test]
    async fn test_listener_opens_lazily_and_closes_on_drop() {
        let store = Arc::new(InMemoryCollection::<i32>::new("numbers"));
        store.set("a", 1).unwrap();

        let source: Arc<dyn QuerySource<i32>> = store.clone();
        let mut stream = listen(source, ListenOptions::default(), SubscriptionId::new(), "test");
        assert_eq!(store.listener_count().unwrap(), 0);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.documents, vec![DocumentSnapshot::new("a", 1)]);
        assert_eq!(store.listener_count().unwrap(), 1);

        drop(stream);
        assert_eq!(store.listener_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_error_ends_stream() {
        let store = Arc::new(InMemoryCollection::<i32>::new("numbers"));
        let source: Arc<dyn QuerySource<i32>> = store.clone();
        let mut stream = listen(source, ListenOptions::default(), SubscriptionId::new(), "test");

        assert!(stream.next().await.unwrap().is_ok());
        store.fail_listeners(&StoreError::unavailable("offline")).unwrap();

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_store());
        assert!(stream.next().now_or_never().flatten().is_none());
    }
}
