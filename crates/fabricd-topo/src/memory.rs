use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fabricd_domain::TargetId;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::debug;

use crate::error::TopoError;
use crate::object::{EventKind, RealmFilter, TopoEvent, TopoObject};
use crate::store::{TopoStore, TopoWatch};

const DEFAULT_EVENT_BUFFER: usize = 256;

/// In-process implementation of [`TopoStore`].
///
/// Used by tests and the simulator mode; an embedder syncing from an external
/// topology service can drive it through the same trait.
#[derive(Clone)]
pub struct InMemoryTopoStore {
    inner: Arc<RwLock<HashMap<TargetId, TopoObject>>>,
    events: broadcast::Sender<TopoEvent>,
}

impl Default for InMemoryTopoStore {
    fn default() -> Self {
        Self::with_event_buffer(DEFAULT_EVENT_BUFFER)
    }
}

impl InMemoryTopoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer size of the watch fan-out; receivers that fall more than this
    /// many events behind observe `Lagged`.
    pub fn with_event_buffer(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    fn emit(&self, kind: EventKind, object: TopoObject) {
        // A send error only means no watcher is currently subscribed.
        let _ = self.events.send(TopoEvent { kind, object });
    }
}

#[async_trait]
impl TopoStore for InMemoryTopoStore {
    async fn create(&self, mut object: TopoObject) -> Result<TopoObject, TopoError> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&object.id) {
            return Err(TopoError::AlreadyExists(object.id.to_string()));
        }
        object.revision = 1;
        guard.insert(object.id.clone(), object.clone());
        drop(guard);

        debug!(id = %object.id, "created topology object");
        self.emit(EventKind::Added, object.clone());
        Ok(object)
    }

    async fn get(&self, id: &TargetId) -> Result<TopoObject, TopoError> {
        let guard = self.inner.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| TopoError::NotFound(id.to_string()))
    }

    async fn update(&self, mut object: TopoObject) -> Result<TopoObject, TopoError> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .get(&object.id)
            .ok_or_else(|| TopoError::NotFound(object.id.to_string()))?;
        if stored.revision != object.revision {
            return Err(TopoError::Conflict {
                id: object.id.to_string(),
                expected: stored.revision,
                actual: object.revision,
            });
        }
        object.revision += 1;
        guard.insert(object.id.clone(), object.clone());
        drop(guard);

        debug!(id = %object.id, revision = object.revision, "updated topology object");
        self.emit(EventKind::Updated, object.clone());
        Ok(object)
    }

    async fn delete(&self, id: &TargetId) -> Result<(), TopoError> {
        let mut guard = self.inner.write().await;
        let removed = guard
            .remove(id)
            .ok_or_else(|| TopoError::NotFound(id.to_string()))?;
        drop(guard);

        debug!(id = %id, "removed topology object");
        self.emit(EventKind::Removed, removed);
        Ok(())
    }

    async fn query(
        &self,
        filter: &RealmFilter,
        sink: mpsc::Sender<TopoObject>,
    ) -> Result<(), TopoError> {
        let matching: Vec<TopoObject> = {
            let guard = self.inner.read().await;
            guard
                .values()
                .filter(|o| filter.matches(o))
                .cloned()
                .collect()
        };
        for object in matching {
            if sink.send(object).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn watch(&self, filter: RealmFilter) -> Result<TopoWatch, TopoError> {
        Ok(TopoWatch::new(self.events.subscribe(), filter))
    }
}
