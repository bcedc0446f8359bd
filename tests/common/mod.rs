#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{Stream, StreamExt};

use livequery::{
    DocumentRef, GetOptions, ListenOptions, ListenerHandle, QuerySnapshot, QuerySource, SnapshotSink, StoreError,
};

/// Routes tracing output to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Collects every item that is ready right now, without waiting.
pub fn drain<S>(stream: &mut S) -> Vec<S::Item>
where
    S: Stream + Unpin,
{
    let mut out = Vec::new();
    while let Some(Some(item)) = stream.next().now_or_never() {
        out.push(item);
    }
    out
}

struct Inner<T> {
    sinks: Vec<(u64, SnapshotSink<T>)>,
    next_id: u64,
    listens: usize,
    unsubscribes: usize,
    last_options: Option<ListenOptions>,
    listen_error: Option<StoreError>,
    latest: Option<QuerySnapshot<T>>,
}

/// Store double whose notifications are pushed by the test.
pub struct ScriptedSource<T> {
    path: String,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ScriptedSource<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> ScriptedSource<T> {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            inner: Arc::new(Mutex::new(Inner {
                sinks: Vec::new(),
                next_id: 0,
                listens: 0,
                unsubscribes: 0,
                last_options: None,
                listen_error: None,
                latest: None,
            })),
        }
    }

    /// Makes every later `listen` call fail with `error`.
    pub fn refuse_listeners(&self, error: StoreError) {
        self.inner.lock().unwrap().listen_error = Some(error);
    }

    /// Delivers `snapshot` to every open listener.
    pub fn push(&self, snapshot: QuerySnapshot<T>) {
        let sinks: Vec<SnapshotSink<T>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.latest = Some(snapshot.clone());
            inner.sinks.iter().map(|(_, sink)| sink.clone()).collect()
        };
        for sink in sinks {
            sink.notify(snapshot.clone());
        }
    }

    /// Terminates every open listener with `error`.
    pub fn fail(&self, error: StoreError) {
        let sinks = std::mem::take(&mut self.inner.lock().unwrap().sinks);
        for (_, sink) in sinks {
            sink.fail(error.clone());
        }
    }

    pub fn listens(&self) -> usize {
        self.inner.lock().unwrap().listens
    }

    pub fn unsubscribes(&self) -> usize {
        self.inner.lock().unwrap().unsubscribes
    }

    pub fn open_listeners(&self) -> usize {
        self.inner.lock().unwrap().sinks.len()
    }

    pub fn last_options(&self) -> Option<ListenOptions> {
        self.inner.lock().unwrap().last_options
    }
}

impl<T: Clone + Send + 'static> QuerySource<T> for ScriptedSource<T> {
    fn path(&self) -> &str {
        &self.path
    }

    fn listen(&self, options: ListenOptions, sink: SnapshotSink<T>) -> Result<ListenerHandle, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.listens += 1;
        inner.last_options = Some(options);
        if let Some(error) = inner.listen_error.clone() {
            return Err(error);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.sinks.push((id, sink));

        let shared = Arc::clone(&self.inner);
        Ok(ListenerHandle::new(move || {
            let mut inner = shared.lock().unwrap();
            inner.sinks.retain(|(sink_id, _)| *sink_id != id);
            inner.unsubscribes += 1;
        }))
    }

    fn get(&self, _options: GetOptions) -> BoxFuture<'static, Result<QuerySnapshot<T>, StoreError>> {
        let latest = self.inner.lock().unwrap().latest.clone();
        let result = latest.ok_or_else(|| StoreError::NotFound {
            path: self.path.clone(),
        });
        future::ready(result).boxed()
    }

    fn add(&self, _data: T) -> BoxFuture<'static, Result<DocumentRef, StoreError>> {
        future::ready(Err(StoreError::PermissionDenied {
            message: format!("{} is read-only", self.path),
        }))
        .boxed()
    }
}
