use async_trait::async_trait;
use fabricd_domain::TargetId;
use tokio::sync::{broadcast, mpsc};

use crate::error::{TopoError, WatchError};
use crate::object::{RealmFilter, TopoEvent, TopoObject};

/// Client view of the external topology store.
///
/// `update` is revision-checked: the write succeeds only when the submitted
/// object carries the currently stored revision, and the returned object has
/// the bumped one. Conflict and not-found are distinguishable so callers can
/// treat both as soft.
#[async_trait]
pub trait TopoStore: Send + Sync + 'static {
    async fn create(&self, object: TopoObject) -> Result<TopoObject, TopoError>;

    async fn get(&self, id: &TargetId) -> Result<TopoObject, TopoError>;

    async fn update(&self, object: TopoObject) -> Result<TopoObject, TopoError>;

    async fn delete(&self, id: &TargetId) -> Result<(), TopoError>;

    /// Streams all objects matching the filter to the sink.
    async fn query(
        &self,
        filter: &RealmFilter,
        sink: mpsc::Sender<TopoObject>,
    ) -> Result<(), TopoError>;

    /// Opens a filtered event stream. The stream is bounded; a slow consumer
    /// observes [`WatchError::Lagged`] instead of silent loss.
    async fn watch(&self, filter: RealmFilter) -> Result<TopoWatch, TopoError>;
}

/// A filtered subscription to topology events.
pub struct TopoWatch {
    rx: broadcast::Receiver<TopoEvent>,
    filter: RealmFilter,
}

impl TopoWatch {
    pub fn new(rx: broadcast::Receiver<TopoEvent>, filter: RealmFilter) -> Self {
        Self { rx, filter }
    }

    /// Receives the next in-realm event. Removal events are delivered for
    /// objects that matched at their last snapshot.
    pub async fn recv(&mut self) -> Result<TopoEvent, WatchError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event.object) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(WatchError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(WatchError::Closed),
            }
        }
    }
}
