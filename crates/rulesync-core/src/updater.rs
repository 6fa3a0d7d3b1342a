// ── Priority updater ──
//
// One per device. Items age while they wait, so a low-priority rule is
// eventually refreshed even when higher-priority items keep coming back.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::SyncConfig;
use crate::error::ModelException;
use crate::worker::Worker;

/// Milliseconds of waiting worth one priority point.
const AGING_STEP_MS: u128 = 100;

/// What the updater should do with an item after refreshing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Re-queue after the inter-refresh pause.
    Keep,
    /// Drop from the queue.
    Retire,
}

/// Something the updater can refresh.
#[async_trait]
pub trait Updatable: Send + Sync + 'static {
    async fn update(&self) -> Result<UpdateOutcome, ModelException>;

    fn base_priority(&self) -> i64;

    /// Viewed items get the view bonus.
    fn is_viewed(&self) -> bool {
        false
    }

    /// Used in log lines.
    fn label(&self) -> String;
}

struct Entry {
    enqueued_at: Instant,
    item: Arc<dyn Updatable>,
}

#[derive(Default)]
struct Queue {
    entries: Mutex<Vec<Entry>>,
}

impl Queue {
    fn push(&self, item: Arc<dyn Updatable>) {
        self.entries.lock().push(Entry {
            enqueued_at: Instant::now(),
            item,
        });
    }

    fn poll(&self, view_bonus: i64) -> Option<Arc<dyn Updatable>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let best = entries
            .iter()
            .enumerate()
            .max_by_key(|(idx, entry)| {
                // Ties go to the earliest entry.
                (score(entry, now, view_bonus), std::cmp::Reverse(*idx))
            })
            .map(|(idx, _)| idx)?;
        Some(entries.remove(best).item)
    }
}

fn score(entry: &Entry, now: Instant, view_bonus: i64) -> i64 {
    let waited = now.saturating_duration_since(entry.enqueued_at).as_millis() / AGING_STEP_MS;
    let age = i64::try_from(waited).unwrap_or(i64::MAX);
    let bonus = if entry.item.is_viewed() { view_bonus } else { 0 };
    age.saturating_add(entry.item.base_priority())
        .saturating_add(bonus)
}

fn same_item<T: ?Sized>(entry: &Entry, item: &T) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(&entry.item), std::ptr::from_ref(item))
}

/// Aging priority queue plus the worker that drains it.
pub struct Updater {
    name: String,
    queue: Arc<Queue>,
    worker: Worker,
    view_bonus: i64,
}

impl Updater {
    pub fn new(name: impl Into<String>, config: &SyncConfig) -> Self {
        let name = name.into();
        let queue = Arc::new(Queue::default());

        let step_queue = Arc::clone(&queue);
        let idle = config.idle_interval;
        let pause = config.refresh_delay;
        let view_bonus = config.view_bonus;
        let worker = Worker::new(format!("updater {name}"), move |cancel| {
            let queue = Arc::clone(&step_queue);
            async move { step(&queue, view_bonus, idle, pause, &cancel).await }
        });

        Self {
            name,
            queue,
            worker,
            view_bonus,
        }
    }

    /// Queue an item. Duplicates are tolerated.
    pub fn add(&self, item: Arc<dyn Updatable>) {
        self.queue.push(item);
    }

    /// Drop every queued entry for `item` (by identity).
    pub fn remove<T: ?Sized>(&self, item: &T) {
        self.queue.entries.lock().retain(|e| !same_item(e, item));
    }

    pub fn contains<T: ?Sized>(&self, item: &T) -> bool {
        self.queue.entries.lock().iter().any(|e| same_item(e, item))
    }

    /// Take the highest-scoring item off the queue.
    pub fn poll(&self) -> Option<Arc<dyn Updatable>> {
        self.queue.poll(self.view_bonus)
    }

    pub fn len(&self) -> usize {
        self.queue.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.entries.lock().clear();
    }

    pub fn start(&self) {
        self.worker.start();
    }

    pub fn stop(&self) {
        self.worker.stop();
    }

    pub async fn stop_and_wait(&self, timeout: Duration) -> bool {
        self.worker.stop_and_wait(timeout).await
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One worker iteration: refresh the best item, or idle.
async fn step(
    queue: &Queue,
    view_bonus: i64,
    idle: Duration,
    pause: Duration,
    cancel: &CancellationToken,
) {
    let Some(item) = queue.poll(view_bonus) else {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(idle) => {}
        }
        return;
    };

    let label = item.label();
    debug!(item = %label, "refreshing");

    let keep = match AssertUnwindSafe(item.update()).catch_unwind().await {
        Ok(Ok(UpdateOutcome::Keep)) => true,
        Ok(Ok(UpdateOutcome::Retire)) => {
            debug!(item = %label, "retired from updater");
            false
        }
        Ok(Err(e)) => {
            warn!(item = %label, error = %e, "refresh failed");
            true
        }
        Err(_) => {
            error!(item = %label, "refresh panicked");
            true
        }
    };

    if keep {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(pause) => {}
        }
        queue.push(item);
    }
}
