//! # Task Queue
//!
//! In-process scheduling abstraction over tokio: idempotent recurring jobs
//! and fire-and-forget async tasks, dispatched through an explicit handler
//! registration table built once at startup. Callers depend on the
//! [`TaskQueue`] trait, never on the tokio machinery behind it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rand::Rng;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Logical hook names for every job this service runs.
pub mod hooks {
    pub const SYNC_ALL_CONNECTIONS: &str = "sync-all-connections";
    pub const HEALTH_CHECK_ALL_CONNECTIONS: &str = "health-check-all-connections";
    pub const HEALTH_CHECK_ALL_REPOSITORIES: &str = "health-check-all-repositories";
    pub const HEALTH_CHECK_SINGLE_CONNECTION: &str = "health-check-single-connection";
    pub const HEALTH_CHECK_SINGLE_REPOSITORY: &str = "health-check-single-repository";
}

/// Key/value arguments handed to a task handler.
pub type TaskPayload = JsonValue;

/// A unit of work dispatched by hook name.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: TaskPayload) -> anyhow::Result<()>;
}

/// Explicit hook-to-handler table, built once at startup and installed into
/// the queue. Replaces any notion of global job registration.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a hook, replacing any previous entry.
    pub fn register(&mut self, hook: &'static str, handler: Arc<dyn TaskHandler>) {
        if self.handlers.insert(hook, handler).is_some() {
            warn!(hook, "Handler re-registered for hook");
        }
    }

    pub(crate) fn get(&self, hook: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(hook).cloned()
    }
}

/// Scheduling surface used by the sync engine and job wiring.
///
/// Both operations are safe against accidental duplication at the level the
/// contract promises: recurring schedules are deduplicated per hook, while
/// async enqueues are not deduplicated at all (callers own that decision).
pub trait TaskQueue: Send + Sync {
    /// Registers a recurring job. No-op when a schedule for `hook` is
    /// already active, so repeated startup wiring cannot double-schedule.
    fn schedule_recurring(&self, hook: &'static str, period: Duration, initial_delay: Duration);

    /// Enqueues one fire-and-forget unit of work. Never blocks the caller;
    /// execution happens on the queue's worker, out of band.
    fn enqueue_async(&self, hook: &'static str, payload: TaskPayload);
}

struct QueuedTask {
    hook: &'static str,
    payload: TaskPayload,
}

/// Tokio-backed [`TaskQueue`]: one worker loop draining an unbounded
/// channel, plus one timer task per active recurring hook. Everything stops
/// when the shutdown token fires.
///
/// Handlers are installed after construction so that fan-out handlers can
/// themselves hold a reference to the queue they enqueue into.
pub struct TokioTaskQueue {
    registry: Arc<RwLock<HandlerRegistry>>,
    tx: mpsc::UnboundedSender<QueuedTask>,
    active_recurring: Mutex<HashSet<&'static str>>,
    shutdown: CancellationToken,
    jitter_pct_max: f64,
}

impl TokioTaskQueue {
    /// Create the queue and spawn its worker loop. Tasks arriving before
    /// [`install_handlers`](Self::install_handlers) are dropped with a
    /// warning, matching the unknown-hook behavior.
    pub fn new(shutdown: CancellationToken, jitter_pct_max: f64) -> Arc<Self> {
        let registry = Arc::new(RwLock::new(HandlerRegistry::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::worker_loop(
            Arc::clone(&registry),
            rx,
            shutdown.clone(),
        ));

        Arc::new(Self {
            registry,
            tx,
            active_recurring: Mutex::new(HashSet::new()),
            shutdown,
            jitter_pct_max: jitter_pct_max.clamp(0.0, 1.0),
        })
    }

    /// Install the handler table built at startup.
    pub fn install_handlers(&self, registry: HandlerRegistry) {
        *self.registry.write().expect("handler registry poisoned") = registry;
    }

    /// Whether a recurring schedule is currently active for the hook.
    pub fn has_recurring(&self, hook: &str) -> bool {
        self.active_recurring
            .lock()
            .expect("recurring registry poisoned")
            .contains(hook)
    }

    async fn worker_loop(
        registry: Arc<RwLock<HandlerRegistry>>,
        mut rx: mpsc::UnboundedReceiver<QueuedTask>,
        shutdown: CancellationToken,
    ) {
        info!("Starting task queue worker");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Task queue worker shutdown requested");
                    break;
                }
                task = rx.recv() => {
                    let Some(task) = task else { break };
                    let handler = registry
                        .read()
                        .expect("handler registry poisoned")
                        .get(task.hook);
                    Self::dispatch(handler, task).await;
                }
            }
        }
        info!("Task queue worker stopped");
    }

    async fn dispatch(handler: Option<Arc<dyn TaskHandler>>, task: QueuedTask) {
        let Some(handler) = handler else {
            warn!(hook = task.hook, "No handler registered for hook; dropping task");
            return;
        };

        counter!("task_queue_dispatched_total", "hook" => task.hook).increment(1);

        // A handler failure is the handler's problem, never the queue's:
        // log it and keep draining.
        if let Err(err) = handler.handle(task.payload).await {
            counter!("task_queue_handler_errors_total", "hook" => task.hook).increment(1);
            error!(hook = task.hook, error = ?err, "Task handler failed");
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_pct_max == 0.0 {
            return delay;
        }
        let pct = rand::thread_rng().gen_range(0.0..self.jitter_pct_max);
        delay + Duration::from_secs_f64(delay.as_secs_f64() * pct)
    }
}

impl TaskQueue for TokioTaskQueue {
    fn schedule_recurring(&self, hook: &'static str, period: Duration, initial_delay: Duration) {
        {
            let mut active = self
                .active_recurring
                .lock()
                .expect("recurring registry poisoned");
            if !active.insert(hook) {
                debug!(hook, "Recurring schedule already active; skipping");
                return;
            }
        }

        let delay = self.jittered(initial_delay);
        info!(
            hook,
            period_seconds = period.as_secs(),
            initial_delay_seconds = delay.as_secs(),
            "Registered recurring job"
        );

        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(delay) => {}
            }

            loop {
                if tx
                    .send(QueuedTask {
                        hook,
                        payload: JsonValue::Null,
                    })
                    .is_err()
                {
                    return;
                }

                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = sleep(period) => {}
                }
            }
        });
    }

    fn enqueue_async(&self, hook: &'static str, payload: TaskPayload) {
        counter!("task_queue_enqueued_total", "hook" => hook).increment(1);
        if self.tx.send(QueuedTask { hook, payload }).is_err() {
            warn!(hook, "Task queue worker is gone; dropping task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        last_payload: Mutex<Option<TaskPayload>>,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_payload: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(&self, payload: TaskPayload) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_payload.lock().unwrap() = Some(payload);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn handle(&self, _payload: TaskPayload) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn queue_with(
        entries: Vec<(&'static str, Arc<dyn TaskHandler>)>,
    ) -> (Arc<TokioTaskQueue>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let queue = TokioTaskQueue::new(shutdown.clone(), 0.0);
        let mut registry = HandlerRegistry::new();
        for (hook, handler) in entries {
            registry.register(hook, handler);
        }
        queue.install_handlers(registry);
        (queue, shutdown)
    }

    #[tokio::test]
    async fn enqueue_async_runs_handler_with_payload() {
        let handler = CountingHandler::new();
        let (queue, shutdown) = queue_with(vec![("test-hook", handler.clone())]);

        queue.enqueue_async("test-hook", json!({"repo": "o/r1"}));
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            handler.last_payload.lock().unwrap().clone(),
            Some(json!({"repo": "o/r1"}))
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn enqueue_async_does_not_deduplicate() {
        let handler = CountingHandler::new();
        let (queue, shutdown) = queue_with(vec![("test-hook", handler.clone())]);

        queue.enqueue_async("test-hook", json!({"repo": "o/r1"}));
        queue.enqueue_async("test-hook", json!({"repo": "o/r1"}));
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn schedule_recurring_is_idempotent_per_hook() {
        let handler = CountingHandler::new();
        let (queue, shutdown) = queue_with(vec![("tick", handler.clone())]);

        // Second registration must be a no-op: one schedule, one first fire.
        queue.schedule_recurring("tick", Duration::from_secs(3600), Duration::from_millis(10));
        queue.schedule_recurring("tick", Duration::from_secs(3600), Duration::from_millis(10));
        assert!(queue.has_recurring("tick"));

        sleep(Duration::from_millis(150)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn recurring_fires_repeatedly_until_shutdown() {
        let handler = CountingHandler::new();
        let (queue, shutdown) = queue_with(vec![("tick", handler.clone())]);

        queue.schedule_recurring("tick", Duration::from_millis(30), Duration::from_millis(0));
        sleep(Duration::from_millis(110)).await;
        shutdown.cancel();

        // Let any already-enqueued tick settle before taking the reading.
        sleep(Duration::from_millis(50)).await;
        let fired = handler.calls.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected repeated firings, got {}", fired);

        // No further firings after shutdown.
        sleep(Duration::from_millis(80)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_the_worker() {
        let counting = CountingHandler::new();
        let (queue, shutdown) = queue_with(vec![
            ("fails", Arc::new(FailingHandler) as Arc<dyn TaskHandler>),
            ("works", counting.clone()),
        ]);

        queue.enqueue_async("fails", JsonValue::Null);
        queue.enqueue_async("works", JsonValue::Null);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn unknown_hook_is_dropped_without_panic() {
        let counting = CountingHandler::new();
        let (queue, shutdown) = queue_with(vec![("known", counting.clone())]);

        queue.enqueue_async("unknown", JsonValue::Null);
        queue.enqueue_async("known", JsonValue::Null);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }
}
