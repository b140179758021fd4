//! Event producers feeding the dispatchers: topology watch, connection
//! lifecycle, and the periodic full sweep that backstops both.

use std::sync::Arc;
use std::time::Duration;

use fabricd_southbound::{ConnManager, ConnWatchError};
use fabricd_topo::{RealmFilter, TopoStore, WatchError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::reconcile::DispatchQueue;

const RESTART_PAUSE: Duration = Duration::from_secs(5);

/// Start/stop-symmetric event source. Starting twice is a no-op; stop cancels
/// the producer task.
pub trait Watcher: Send {
    fn start(&mut self);
    fn stop(&mut self);
}

// ── Topology events ──────────────────────────────────────────────────────────

/// Converts realm-filtered topology events into reconcile requests. Removal
/// events are forwarded too, so reconcilers observe disappearance. Lag or
/// stream loss forces a resubscribe.
pub struct TopoWatcher {
    topo: Arc<dyn TopoStore>,
    filter: RealmFilter,
    queue: DispatchQueue,
    task: Option<JoinHandle<()>>,
}

impl TopoWatcher {
    pub fn new(topo: Arc<dyn TopoStore>, filter: RealmFilter, queue: DispatchQueue) -> Self {
        Self {
            topo,
            filter,
            queue,
            task: None,
        }
    }
}

impl Watcher for TopoWatcher {
    fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let topo = self.topo.clone();
        let filter = self.filter.clone();
        let queue = self.queue.clone();
        self.task = Some(tokio::spawn(async move {
            loop {
                let mut watch = match topo.watch(filter.clone()).await {
                    Ok(watch) => watch,
                    Err(e) => {
                        warn!(error = %e, "topology watch failed to start");
                        sleep(RESTART_PAUSE).await;
                        continue;
                    }
                };
                loop {
                    match watch.recv().await {
                        Ok(event) => {
                            if queue.enqueue(event.object.id).await.is_err() {
                                return;
                            }
                        }
                        Err(WatchError::Lagged(n)) => {
                            error!(dropped = n, "topology watch overflowed, restarting");
                            break;
                        }
                        Err(WatchError::Closed) => {
                            warn!("topology watch closed, restarting");
                            break;
                        }
                    }
                }
                sleep(RESTART_PAUSE).await;
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Connection events ────────────────────────────────────────────────────────

/// Forwards connection add/remove events; this is how the pipeline loop
/// learns a session became available.
pub struct ConnWatcher {
    conns: Arc<ConnManager>,
    queue: DispatchQueue,
    task: Option<JoinHandle<()>>,
}

impl ConnWatcher {
    pub fn new(conns: Arc<ConnManager>, queue: DispatchQueue) -> Self {
        Self {
            conns,
            queue,
            task: None,
        }
    }
}

impl Watcher for ConnWatcher {
    fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let conns = self.conns.clone();
        let queue = self.queue.clone();
        self.task = Some(tokio::spawn(async move {
            loop {
                let mut watch = conns.watch().await;
                loop {
                    match watch.recv().await {
                        Ok(event) => {
                            if queue.enqueue(event.target_id).await.is_err() {
                                return;
                            }
                        }
                        Err(ConnWatchError::Lagged(n)) => {
                            error!(dropped = n, "connection watch overflowed, restarting");
                            break;
                        }
                        Err(ConnWatchError::Closed) => {
                            warn!("connection watch closed, restarting");
                            break;
                        }
                    }
                }
                sleep(RESTART_PAUSE).await;
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Periodic sweep ───────────────────────────────────────────────────────────

/// Re-enqueues every in-realm entity on a fixed period. Mandatory backstop:
/// watch streams are lossy under partitions and the connection watch is
/// in-process only. The first sweep fires immediately, doubling as the
/// initial reconciliation pass.
pub struct SweepWatcher {
    topo: Arc<dyn TopoStore>,
    filter: RealmFilter,
    period: Duration,
    queue_size: usize,
    queue: DispatchQueue,
    task: Option<JoinHandle<()>>,
}

impl SweepWatcher {
    pub fn new(
        topo: Arc<dyn TopoStore>,
        filter: RealmFilter,
        period: Duration,
        queue_size: usize,
        queue: DispatchQueue,
    ) -> Self {
        Self {
            topo,
            filter,
            period,
            queue_size,
            queue,
            task: None,
        }
    }
}

impl Watcher for SweepWatcher {
    fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let topo = self.topo.clone();
        let filter = self.filter.clone();
        let period = self.period;
        let queue_size = self.queue_size;
        let queue = self.queue.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let (tx, mut rx) = mpsc::channel(queue_size);
                let store = topo.clone();
                let sweep_filter = filter.clone();
                let query = tokio::spawn(async move { store.query(&sweep_filter, tx).await });
                while let Some(object) = rx.recv().await {
                    if queue.enqueue(object.id).await.is_err() {
                        query.abort();
                        return;
                    }
                }
                match query.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "periodic sweep query failed"),
                    Err(_) => {}
                }
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
