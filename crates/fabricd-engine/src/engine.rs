//! Assembly of the three control loops over their shared stores.

use std::sync::Arc;
use std::time::Duration;

use fabricd_inventory::ConfigStore;
use fabricd_southbound::{ConnManager, GnmiConnector};
use fabricd_topo::{RealmFilter, TopoStore};
use tracing::info;

use crate::chassis::ChassisReconciler;
use crate::connection::ConnectionReconciler;
use crate::pipeline::PipelineReconciler;
use crate::reconcile::{Dispatcher, DispatcherConfig};
use crate::watchers::{ConnWatcher, SweepWatcher, TopoWatcher, Watcher};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Label key and value scoping the entities this instance manages.
    pub realm_label: String,
    pub realm_value: String,
    /// Budget for one reconcile pass.
    pub default_timeout: Duration,
    /// Period of the full sweep and of steady-state pipeline re-checks.
    pub requeue_interval: Duration,
    pub queue_size: usize,
    pub worker_count: usize,
    /// Retry backoff for failed reconciles.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl EngineConfig {
    pub fn new(realm_label: impl Into<String>, realm_value: impl Into<String>) -> Self {
        Self {
            realm_label: realm_label.into(),
            realm_value: realm_value.into(),
            default_timeout: Duration::from_secs(30),
            requeue_interval: Duration::from_secs(120),
            queue_size: 100,
            worker_count: 16,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(180),
        }
    }

    fn realm_filter(&self) -> RealmFilter {
        RealmFilter::device_realm(self.realm_label.clone(), self.realm_value.clone())
    }

    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            timeout: self.default_timeout,
            queue_size: self.queue_size,
            worker_count: self.worker_count,
            backoff_base: self.backoff_base,
            backoff_cap: self.backoff_cap,
        }
    }
}

struct Running {
    watchers: Vec<Box<dyn Watcher>>,
    dispatchers: Vec<Dispatcher>,
}

/// The reconciliation engine: three dispatchers, their watchers, and the
/// shared connection manager. Failure domains stay isolated; a wedged chassis
/// apply never blocks pipeline convergence.
pub struct Engine {
    config: EngineConfig,
    topo: Arc<dyn TopoStore>,
    inventory: Arc<dyn ConfigStore>,
    conns: Arc<ConnManager>,
    gnmi: Arc<dyn GnmiConnector>,
    running: Option<Running>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        topo: Arc<dyn TopoStore>,
        inventory: Arc<dyn ConfigStore>,
        conns: Arc<ConnManager>,
        gnmi: Arc<dyn GnmiConnector>,
    ) -> Self {
        Self {
            config,
            topo,
            inventory,
            conns,
            gnmi,
            running: None,
        }
    }

    pub fn conns(&self) -> &Arc<ConnManager> {
        &self.conns
    }

    /// Spawns the dispatchers and starts every watcher. Idempotent.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        info!(
            realm_label = %self.config.realm_label,
            realm_value = %self.config.realm_value,
            "starting reconciliation engine"
        );
        let filter = self.config.realm_filter();
        let dispatcher_config = self.config.dispatcher_config();

        let connection = Dispatcher::spawn(
            Arc::new(ConnectionReconciler::new(
                self.topo.clone(),
                self.conns.clone(),
            )),
            dispatcher_config.clone(),
        );
        let pipeline = Dispatcher::spawn(
            Arc::new(PipelineReconciler::new(
                self.topo.clone(),
                self.inventory.clone(),
                self.conns.clone(),
                self.config.requeue_interval,
            )),
            dispatcher_config.clone(),
        );
        let chassis = Dispatcher::spawn(
            Arc::new(ChassisReconciler::new(
                self.topo.clone(),
                self.inventory.clone(),
                self.gnmi.clone(),
            )),
            dispatcher_config,
        );

        let mut watchers: Vec<Box<dyn Watcher>> = vec![
            Box::new(TopoWatcher::new(
                self.topo.clone(),
                filter.clone(),
                connection.queue(),
            )),
            Box::new(ConnWatcher::new(self.conns.clone(), connection.queue())),
            Box::new(SweepWatcher::new(
                self.topo.clone(),
                filter.clone(),
                self.config.requeue_interval,
                self.config.queue_size,
                connection.queue(),
            )),
            Box::new(TopoWatcher::new(
                self.topo.clone(),
                filter.clone(),
                pipeline.queue(),
            )),
            Box::new(ConnWatcher::new(self.conns.clone(), pipeline.queue())),
            Box::new(SweepWatcher::new(
                self.topo.clone(),
                filter.clone(),
                self.config.requeue_interval,
                self.config.queue_size,
                pipeline.queue(),
            )),
            Box::new(TopoWatcher::new(
                self.topo.clone(),
                filter.clone(),
                chassis.queue(),
            )),
            Box::new(SweepWatcher::new(
                self.topo.clone(),
                filter,
                self.config.requeue_interval,
                self.config.queue_size,
                chassis.queue(),
            )),
        ];
        for watcher in &mut watchers {
            watcher.start();
        }

        self.running = Some(Running {
            watchers,
            dispatchers: vec![connection, pipeline, chassis],
        });
    }

    /// Stops watchers first, then dispatchers, then closes every southbound
    /// session. In-flight reconciles drain under their own timeout.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        info!("stopping reconciliation engine");
        for watcher in &mut running.watchers {
            watcher.stop();
        }
        for dispatcher in running.dispatchers {
            dispatcher.stop();
        }
        self.conns.close_all().await;
    }
}
