// ── Background worker ──
//
// A named, restartable loop around one async step. Stopping is cooperative:
// the cancellation token interrupts sleeps, never a step that is already
// talking to a device.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type StepFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Slot {
    /// Present while started; cleared by `stop`.
    cancel: Option<CancellationToken>,
    /// Most recently spawned task, possibly still winding down.
    handle: Option<JoinHandle<()>>,
}

pub struct Worker {
    name: String,
    interval: Option<Duration>,
    step: StepFn,
    slot: Mutex<Slot>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// `step` is called repeatedly with the worker's cancellation token.
    pub fn new<F, Fut>(name: impl Into<String>, step: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval: None,
            step: Arc::new(move |cancel: CancellationToken| -> BoxFuture<'static, ()> {
                Box::pin(step(cancel))
            }),
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Sleep this long between steps.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .cancel
            .as_ref()
            .is_some_and(|c| !c.is_cancelled())
    }

    /// Start the loop. No-op if already running or outside a Tokio runtime.
    pub fn start(&self) {
        let mut slot = self.slot.lock();
        if slot.cancel.as_ref().is_some_and(|c| !c.is_cancelled()) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(worker = %self.name, "no Tokio runtime; worker not started");
            return;
        };

        let cancel = CancellationToken::new();
        let previous = slot.handle.take();
        let step = Arc::clone(&self.step);
        let interval = self.interval;
        let name = self.name.clone();
        let token = cancel.clone();

        slot.handle = Some(runtime.spawn(async move {
            // A previous run may still be finishing its last step.
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    warn!(worker = %name, error = %e, "previous run ended abnormally");
                }
            }
            info!(worker = %name, "worker started");
            run_loop(&step, interval, &token).await;
            info!(worker = %name, "worker stopped");
        }));
        slot.cancel = Some(cancel);
    }

    /// Request a stop without waiting for the loop to exit.
    pub fn stop(&self) {
        if let Some(cancel) = self.slot.lock().cancel.take() {
            debug!(worker = %self.name, "stop requested");
            cancel.cancel();
        }
    }

    /// Request a stop and wait up to `timeout` for the loop to exit.
    ///
    /// Returns `true` if the loop exited in time.
    pub async fn stop_and_wait(&self, timeout: Duration) -> bool {
        self.stop();
        let handle = self.slot.lock().handle.take();
        let Some(handle) = handle else {
            return true;
        };

        if tokio::time::timeout(timeout, handle).await.is_ok() {
            true
        } else {
            warn!(worker = %self.name, ?timeout, "worker did not stop in time");
            false
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(cancel) = self.slot.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

async fn run_loop(step: &StepFn, interval: Option<Duration>, cancel: &CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        step(cancel.clone()).await;

        if let Some(interval) = interval {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }
}
