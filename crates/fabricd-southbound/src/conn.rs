use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use fabricd_domain::TargetId;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SouthboundError;
use crate::session::{Destination, ElectionId, P4rtConnector, P4rtSession, PipelineSpec};

const EVENT_BUFFER: usize = 256;

// ── Election clock ───────────────────────────────────────────────────────────

/// Monotonic election-id source shared by all connections of a manager.
/// Ids are current-time nanoseconds, bumped past the previous one on clock
/// stalls, so a reconnect always arbitrates with a distinct, higher id.
#[derive(Debug, Default)]
pub struct ElectionClock {
    last: AtomicU64,
}

impl ElectionClock {
    pub fn next(&self) -> ElectionId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return ElectionId(next),
                Err(observed) => prev = observed,
            }
        }
    }
}

// ── Connections ──────────────────────────────────────────────────────────────

/// A live P4Runtime session bound to one target. Exactly one exists per
/// target at any instant; lifecycle is owned by the [`ConnManager`].
pub struct Conn {
    id: Uuid,
    dest: Destination,
    session: Arc<dyn P4rtSession>,
    clock: Arc<ElectionClock>,
    election: Mutex<Option<ElectionId>>,
}

impl Conn {
    fn new(dest: Destination, session: Arc<dyn P4rtSession>, clock: Arc<ElectionClock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dest,
            session,
            clock,
            election: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target_id(&self) -> &TargetId {
        &self.dest.target_id
    }

    pub fn dest(&self) -> &Destination {
        &self.dest
    }

    /// The id this session last won mastership with, if any.
    pub fn election_id(&self) -> Option<ElectionId> {
        *self.election.lock().expect("election lock poisoned")
    }

    /// Re-arbitrates mastership with a fresh election id.
    pub async fn arbitrate(&self) -> Result<ElectionId, SouthboundError> {
        let election_id = self.clock.next();
        self.session.arbitrate(election_id).await?;
        *self.election.lock().expect("election lock poisoned") = Some(election_id);
        Ok(election_id)
    }

    pub async fn pipeline_cookie(&self) -> Result<u64, SouthboundError> {
        self.session.pipeline_cookie().await
    }

    pub async fn set_pipeline(&self, spec: PipelineSpec) -> Result<(), SouthboundError> {
        self.session.set_pipeline(spec).await
    }

    async fn close(&self) {
        self.session.close().await;
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("dest", &self.dest)
            .finish()
    }
}

// ── Lifecycle events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEventKind {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnEvent {
    pub kind: ConnEventKind,
    pub target_id: TargetId,
    pub conn_id: Uuid,
}

#[derive(Debug, Error)]
pub enum ConnWatchError {
    #[error("connection watch lagged by {0} events")]
    Lagged(u64),

    #[error("connection watch closed")]
    Closed,
}

/// Subscription to connection lifecycle events. Currently live connections
/// are replayed as `Added` on subscribe.
pub struct ConnWatch {
    pending: VecDeque<ConnEvent>,
    rx: broadcast::Receiver<ConnEvent>,
}

impl ConnWatch {
    pub async fn recv(&mut self) -> Result<ConnEvent, ConnWatchError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        match self.rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(ConnWatchError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(ConnWatchError::Closed),
        }
    }
}

// ── Manager ──────────────────────────────────────────────────────────────────

/// Pool of P4Runtime sessions keyed by target.
pub struct ConnManager {
    connector: Arc<dyn P4rtConnector>,
    conns: RwLock<HashMap<TargetId, Arc<Conn>>>,
    events: broadcast::Sender<ConnEvent>,
    clock: Arc<ElectionClock>,
}

impl ConnManager {
    pub fn new(connector: Arc<dyn P4rtConnector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            connector,
            conns: RwLock::new(HashMap::new()),
            events,
            clock: Arc::new(ElectionClock::default()),
        }
    }

    /// Idempotent connect: an existing session for the target is returned
    /// as-is when it matches the destination, and `already-exists` is the
    /// failure when it does not (the caller must disconnect first). A new
    /// session performs its initial mastership arbitration before it becomes
    /// visible.
    pub async fn connect(&self, dest: Destination) -> Result<Arc<Conn>, SouthboundError> {
        {
            let conns = self.conns.read().await;
            if let Some(existing) = conns.get(&dest.target_id) {
                return existing_or_conflict(existing, &dest);
            }
        }

        info!(target_id = %dest.target_id, endpoint = %dest.endpoint, "connecting to target");
        let session = self.connector.open(&dest).await?;
        let conn = Arc::new(Conn::new(dest.clone(), session, self.clock.clone()));
        if let Err(e) = conn.arbitrate().await {
            warn!(target_id = %dest.target_id, error = %e, "initial arbitration failed");
            conn.close().await;
            return Err(e);
        }

        let mut conns = self.conns.write().await;
        if let Some(existing) = conns.get(&dest.target_id) {
            // Raced with a concurrent connect; keep the established session.
            let existing = existing.clone();
            drop(conns);
            conn.close().await;
            return existing_or_conflict(&existing, &dest);
        }
        conns.insert(dest.target_id.clone(), conn.clone());
        drop(conns);

        info!(target_id = %dest.target_id, conn_id = %conn.id(), election_id = ?conn.election_id(), "target connected");
        let _ = self.events.send(ConnEvent {
            kind: ConnEventKind::Added,
            target_id: dest.target_id,
            conn_id: conn.id(),
        });
        Ok(conn)
    }

    pub async fn disconnect(&self, target_id: &TargetId) -> Result<(), SouthboundError> {
        let removed = self.conns.write().await.remove(target_id);
        match removed {
            Some(conn) => {
                conn.close().await;
                info!(target_id = %target_id, conn_id = %conn.id(), "target disconnected");
                let _ = self.events.send(ConnEvent {
                    kind: ConnEventKind::Removed,
                    target_id: target_id.clone(),
                    conn_id: conn.id(),
                });
                Ok(())
            }
            None => Err(SouthboundError::NotFound(target_id.to_string())),
        }
    }

    pub async fn get_by_target(&self, target_id: &TargetId) -> Result<Arc<Conn>, SouthboundError> {
        self.conns
            .read()
            .await
            .get(target_id)
            .cloned()
            .ok_or_else(|| SouthboundError::NotFound(target_id.to_string()))
    }

    /// Streams lifecycle events, replaying live connections first.
    pub async fn watch(&self) -> ConnWatch {
        let rx = self.events.subscribe();
        let pending = self
            .conns
            .read()
            .await
            .values()
            .map(|conn| ConnEvent {
                kind: ConnEventKind::Added,
                target_id: conn.target_id().clone(),
                conn_id: conn.id(),
            })
            .collect();
        ConnWatch { pending, rx }
    }

    /// Closes every session; part of engine shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Conn>> = self.conns.write().await.drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close().await;
            let _ = self.events.send(ConnEvent {
                kind: ConnEventKind::Removed,
                target_id: conn.target_id().clone(),
                conn_id: conn.id(),
            });
        }
    }
}

fn existing_or_conflict(
    existing: &Arc<Conn>,
    dest: &Destination,
) -> Result<Arc<Conn>, SouthboundError> {
    if existing.dest().endpoint == dest.endpoint && existing.dest().device_id == dest.device_id {
        Ok(existing.clone())
    } else {
        Err(SouthboundError::AlreadyExists(dest.target_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimFabric;

    fn dest(target: &str, endpoint: &str) -> Destination {
        Destination {
            target_id: TargetId::new(target),
            endpoint: endpoint.to_string(),
            device_id: 1,
            role_name: "provisioner".to_string(),
        }
    }

    async fn manager_with_switch(endpoint: &str) -> ConnManager {
        let fabric = Arc::new(SimFabric::new());
        fabric.add_switch(endpoint, 1).await;
        ConnManager::new(fabric)
    }

    #[tokio::test]
    async fn connect_is_idempotent_per_target() {
        let manager = manager_with_switch("sw1:20000").await;

        let first = manager.connect(dest("spine1", "sw1:20000")).await.unwrap();
        let second = manager.connect(dest("spine1", "sw1:20000")).await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn connect_conflicts_on_different_endpoint() {
        let manager = manager_with_switch("sw1:20000").await;
        manager.connect(dest("spine1", "sw1:20000")).await.unwrap();

        let err = manager
            .connect(dest("spine1", "sw2:20000"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn reconnect_yields_distinct_election_id() {
        let manager = manager_with_switch("sw1:20000").await;

        let first = manager.connect(dest("spine1", "sw1:20000")).await.unwrap();
        let first_election = first.election_id().unwrap();

        manager.disconnect(&TargetId::new("spine1")).await.unwrap();
        let second = manager.connect(dest("spine1", "sw1:20000")).await.unwrap();
        let second_election = second.election_id().unwrap();

        assert_ne!(first.id(), second.id());
        assert!(second_election > first_election);
    }

    #[tokio::test]
    async fn disconnect_unknown_target_is_not_found() {
        let manager = manager_with_switch("sw1:20000").await;
        let err = manager
            .disconnect(&TargetId::new("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(manager
            .get_by_target(&TargetId::new("missing"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn watch_replays_live_connections_and_streams_changes() {
        let manager = manager_with_switch("sw1:20000").await;
        manager.connect(dest("spine1", "sw1:20000")).await.unwrap();

        let mut watch = manager.watch().await;
        let replayed = watch.recv().await.unwrap();
        assert_eq!(replayed.kind, ConnEventKind::Added);
        assert_eq!(replayed.target_id.as_str(), "spine1");

        manager.disconnect(&TargetId::new("spine1")).await.unwrap();
        let removed = watch.recv().await.unwrap();
        assert_eq!(removed.kind, ConnEventKind::Removed);
        assert_eq!(removed.target_id.as_str(), "spine1");
    }
}
