//! Per-target work queues. Each reconciler gets its own dispatcher; within a
//! dispatcher a target is serialized and concurrent requests for it coalesce
//! into at most one re-execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fabricd_domain::TargetId;
use tokio::select;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::ReconcileError;

/// What a finished reconcile pass asks of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; wait for the next event.
    Ack,
    /// Run again immediately.
    Requeue,
    /// Run again after the delay, unless an event arrives sooner.
    RequeueAfter(Duration),
}

/// One control loop's per-target convergence step. Must be idempotent: the
/// dispatcher may run it more often than events strictly demand.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, target_id: &TargetId) -> Result<Outcome, ReconcileError>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Budget for one reconcile pass; overruns count as transient failures.
    pub timeout: Duration,
    pub queue_size: usize,
    /// Concurrent reconciles across all targets of this dispatcher.
    pub worker_count: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            queue_size: 100,
            worker_count: 16,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(180),
        }
    }
}

/// Cloneable producer side of a dispatcher's queue; what watchers hold.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<TargetId>,
}

impl DispatchQueue {
    /// Requests a reconcile for the target. Errors only after the dispatcher
    /// has stopped.
    pub async fn enqueue(&self, target_id: TargetId) -> Result<(), ReconcileError> {
        self.tx
            .send(target_id)
            .await
            .map_err(|_| ReconcileError::Internal("dispatcher stopped".into()))
    }
}

/// Owns the dispatch loop of one reconciler.
pub struct Dispatcher {
    queue: DispatchQueue,
    task: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(reconciler: Arc<dyn Reconciler>, config: DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size);
        let task = tokio::spawn(dispatch_loop(reconciler, rx, config));
        Self {
            queue: DispatchQueue { tx },
            task,
        }
    }

    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// Ends the dispatch loop. In-flight reconciles drain on their own: their
    /// signal channels close and each pass is bounded by the timeout.
    pub fn stop(self) {
        self.task.abort();
    }
}

struct TargetEntry {
    signal: mpsc::Sender<()>,
    _task: JoinHandle<()>,
}

async fn dispatch_loop(
    reconciler: Arc<dyn Reconciler>,
    mut rx: mpsc::Receiver<TargetId>,
    config: DispatcherConfig,
) {
    let semaphore = Arc::new(Semaphore::new(config.worker_count));
    let mut entries: HashMap<TargetId, TargetEntry> = HashMap::new();

    while let Some(target_id) = rx.recv().await {
        let entry = entries.entry(target_id.clone()).or_insert_with(|| {
            spawn_target_task(
                reconciler.clone(),
                target_id.clone(),
                semaphore.clone(),
                config.clone(),
            )
        });
        // Capacity-1 signal channel: a full channel means a re-execution is
        // already pending, which is exactly the coalescing we want.
        let _ = entry.signal.try_send(());
    }
}

fn spawn_target_task(
    reconciler: Arc<dyn Reconciler>,
    target_id: TargetId,
    semaphore: Arc<Semaphore>,
    config: DispatcherConfig,
) -> TargetEntry {
    let (signal, mut signal_rx) = mpsc::channel::<()>(1);
    let task = tokio::spawn(async move {
        let mut backoff = config.backoff_base;
        'idle: while signal_rx.recv().await.is_some() {
            loop {
                let result = {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    match tokio::time::timeout(
                        config.timeout,
                        reconciler.reconcile(&target_id),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ReconcileError::Timeout(config.timeout)),
                    }
                };

                match result {
                    Ok(Outcome::Ack) => {
                        backoff = config.backoff_base;
                        debug!(reconciler = reconciler.name(), target_id = %target_id, "reconcile acked");
                        continue 'idle;
                    }
                    // Progress, not convergence: the backoff level is kept so
                    // a failing state-machine cycle still slows down.
                    Ok(Outcome::Requeue) => {
                        if dispatcher_gone(&mut signal_rx) {
                            return;
                        }
                        continue;
                    }
                    Ok(Outcome::RequeueAfter(delay)) => {
                        backoff = config.backoff_base;
                        select! {
                            _ = sleep(delay) => {}
                            more = signal_rx.recv() => {
                                if more.is_none() {
                                    return;
                                }
                            }
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            reconciler = reconciler.name(),
                            target_id = %target_id,
                            error = %e,
                            retry_in = ?backoff,
                            "reconcile failed"
                        );
                        // The full backoff is honored even if events arrive;
                        // a failure that writes state back would otherwise
                        // notify itself into a hot loop.
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(config.backoff_cap);
                        if dispatcher_gone(&mut signal_rx) {
                            return;
                        }
                        continue;
                    }
                }
            }
        }
    });
    TargetEntry {
        signal,
        _task: task,
    }
}

/// True once the dispatcher dropped the signal sender. A pending signal may
/// be consumed here; the caller is about to re-run regardless.
fn dispatcher_gone(signal_rx: &mut mpsc::Receiver<()>) -> bool {
    matches!(
        signal_rx.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Spy {
        running: Mutex<HashMap<String, usize>>,
        max_concurrent: Mutex<HashMap<String, usize>>,
        total: AtomicUsize,
        hold: Option<Arc<Notify>>,
        result: Mutex<Vec<Result<Outcome, ()>>>,
    }

    impl Spy {
        fn total(&self) -> usize {
            self.total.load(Ordering::SeqCst)
        }

        fn max_for(&self, key: &str) -> usize {
            *self.max_concurrent.lock().unwrap().get(key).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl Reconciler for Spy {
        fn name(&self) -> &'static str {
            "spy"
        }

        async fn reconcile(&self, target_id: &TargetId) -> Result<Outcome, ReconcileError> {
            let key = target_id.to_string();
            {
                let mut running = self.running.lock().unwrap();
                let n = running.entry(key.clone()).or_insert(0);
                *n += 1;
                let mut max = self.max_concurrent.lock().unwrap();
                let m = max.entry(key.clone()).or_insert(0);
                *m = (*m).max(*n);
            }
            self.total.fetch_add(1, Ordering::SeqCst);

            if let Some(hold) = &self.hold {
                hold.notified().await;
            } else {
                sleep(Duration::from_millis(5)).await;
            }

            *self
                .running
                .lock()
                .unwrap()
                .get_mut(&key)
                .expect("running entry") -= 1;

            match self.result.lock().unwrap().pop() {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(())) => Err(ReconcileError::Internal("forced failure".into())),
                None => Ok(Outcome::Ack),
            }
        }
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            timeout: Duration::from_secs(5),
            queue_size: 100,
            worker_count: 8,
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn same_target_never_reconciles_concurrently() {
        let spy = Arc::new(Spy::default());
        let dispatcher = Dispatcher::spawn(spy.clone(), fast_config());
        let queue = dispatcher.queue();

        for _ in 0..20 {
            queue.enqueue(TargetId::new("spine1")).await.unwrap();
            tokio::task::yield_now().await;
        }
        sleep(Duration::from_millis(200)).await;

        assert!(spy.total() >= 1);
        assert_eq!(spy.max_for("spine1"), 1);
        dispatcher.stop();
    }

    #[tokio::test]
    async fn distinct_targets_reconcile_in_parallel() {
        let hold = Arc::new(Notify::new());
        let spy = Arc::new(Spy {
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let dispatcher = Dispatcher::spawn(spy.clone(), fast_config());
        let queue = dispatcher.queue();

        queue.enqueue(TargetId::new("spine1")).await.unwrap();
        queue.enqueue(TargetId::new("spine2")).await.unwrap();

        // Both passes start even though neither has finished.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while spy.total() < 2 && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(spy.total(), 2);

        hold.notify_waiters();
        hold.notify_waiters();
        dispatcher.stop();
    }

    #[tokio::test]
    async fn pending_requests_coalesce_into_one_rerun() {
        let hold = Arc::new(Notify::new());
        let spy = Arc::new(Spy {
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let dispatcher = Dispatcher::spawn(spy.clone(), fast_config());
        let queue = dispatcher.queue();

        queue.enqueue(TargetId::new("spine1")).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while spy.total() < 1 && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(5)).await;
        }

        // Ten requests while the first pass is still running.
        for _ in 0..10 {
            queue.enqueue(TargetId::new("spine1")).await.unwrap();
        }
        sleep(Duration::from_millis(50)).await;
        hold.notify_waiters();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while spy.total() < 2 && tokio::time::Instant::now() < deadline {
            hold.notify_waiters();
            sleep(Duration::from_millis(5)).await;
        }
        sleep(Duration::from_millis(100)).await;

        // One initial pass plus exactly one coalesced re-execution.
        assert_eq!(spy.total(), 2);
        dispatcher.stop();
    }

    #[tokio::test]
    async fn failures_retry_with_backoff() {
        let spy = Arc::new(Spy {
            result: Mutex::new(vec![Ok(Outcome::Ack), Err(()), Err(())]),
            ..Default::default()
        });
        let dispatcher = Dispatcher::spawn(spy.clone(), fast_config());
        let queue = dispatcher.queue();

        queue.enqueue(TargetId::new("spine1")).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while spy.total() < 3 && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        // Two failures and the final success all ran.
        assert_eq!(spy.total(), 3);
        dispatcher.stop();
    }

    #[tokio::test]
    async fn requeue_after_schedules_a_rerun() {
        let spy = Arc::new(Spy {
            result: Mutex::new(vec![Ok(Outcome::Ack), Ok(Outcome::RequeueAfter(Duration::from_millis(20)))]),
            ..Default::default()
        });
        let dispatcher = Dispatcher::spawn(spy.clone(), fast_config());
        let queue = dispatcher.queue();

        queue.enqueue(TargetId::new("spine1")).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while spy.total() < 2 && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(spy.total(), 2);
        dispatcher.stop();
    }
}
