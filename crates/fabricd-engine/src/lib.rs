pub mod chassis;
pub mod connection;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod util;
pub mod watchers;

pub use chassis::ChassisReconciler;
pub use connection::ConnectionReconciler;
pub use engine::{Engine, EngineConfig};
pub use error::ReconcileError;
pub use pipeline::PipelineReconciler;
pub use reconcile::{DispatchQueue, Dispatcher, DispatcherConfig, Outcome, Reconciler};
pub use watchers::{ConnWatcher, SweepWatcher, TopoWatcher, Watcher};
