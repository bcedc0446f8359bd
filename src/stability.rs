//! Host stability coordination.
//!
//! Hosts that wait for "all startup work done" (server-side rendering,
//! pre-rendering, test harnesses) plug in a `StabilityCoordinator`. A gated
//! stream keeps one pending task open from its first poll until it produces
//! its first item or error.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_stream::stream;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Token for one outstanding unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingTask(u64);

impl PendingTask {
    /// Token with the given id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Id assigned by the coordinator.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Host hook deciding when the application counts as stable.
pub trait StabilityCoordinator: Send + Sync {
    /// Registers a unit of work that keeps the host unstable.
    fn hold(&self) -> PendingTask;

    /// Completes `task`.
    fn release(&self, task: PendingTask);

    /// Called when a gated stream is dropped before it produced anything.
    ///
    /// `release` is never called for such a task. The default does nothing.
    fn abandon(&self, task: PendingTask) {
        let _ = task;
    }
}

/// Coordinator for hosts without a stability concept.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCoordinator;

impl StabilityCoordinator for NoopCoordinator {
    fn hold(&self) -> PendingTask {
        PendingTask(0)
    }

    fn release(&self, _task: PendingTask) {}
}

/// Counts outstanding tasks; stable when none are left.
///
/// Abandoned tasks are counted as finished.
#[derive(Debug, Default)]
pub struct PendingCounter {
    next: AtomicU64,
    outstanding: AtomicUsize,
}

impl PendingCounter {
    /// Counter with nothing outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks held but not yet released or abandoned.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// True when no task is outstanding.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.outstanding() == 0
    }

    fn finish(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl StabilityCoordinator for PendingCounter {
    fn hold(&self) -> PendingTask {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        PendingTask(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn release(&self, _task: PendingTask) {
        self.finish();
    }

    fn abandon(&self, _task: PendingTask) {
        self.finish();
    }
}

/// Pending task owned by one gated stream.
struct Gate {
    coordinator: Arc<dyn StabilityCoordinator>,
    task: Option<PendingTask>,
}

impl Gate {
    fn open(coordinator: Arc<dyn StabilityCoordinator>) -> Self {
        let task = coordinator.hold();
        trace!(task = task.id(), "stability task held");
        Self {
            coordinator,
            task: Some(task),
        }
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            trace!(task = task.id(), "stability task released");
            self.coordinator.release(task);
        }
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            trace!(task = task.id(), "stability task abandoned");
            self.coordinator.abandon(task);
        }
    }
}

/// Keeps the host unstable until `inner` yields its first item.
///
/// The task is held on first poll and released exactly once, on the first
/// item or when the stream completes without one. Dropping the stream earlier
/// abandons the task instead.
pub fn keep_unstable_until_first<S, I>(
    inner: S,
    coordinator: Arc<dyn StabilityCoordinator>,
) -> BoxStream<'static, I>
where
    S: Stream<Item = I> + Send + 'static,
    I: Send + 'static,
{
    stream! {
        let mut gate = Gate::open(coordinator);
        let mut inner = Box::pin(inner);
        while let Some(item) = inner.next().await {
            gate.release();
            yield item;
        }
        gate.release();
    }
    .boxed()
}
