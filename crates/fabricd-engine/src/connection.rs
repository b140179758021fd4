use std::sync::Arc;

use async_trait::async_trait;
use fabricd_domain::{TargetId, PROVISIONER_ROLE};
use fabricd_southbound::{ConnManager, Destination};
use fabricd_topo::TopoStore;
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::reconcile::{Outcome, Reconciler};

/// Ensures every in-realm target with a P4Runtime endpoint has exactly one
/// live session, and that targets gone from the topology are disconnected.
pub struct ConnectionReconciler {
    topo: Arc<dyn TopoStore>,
    conns: Arc<ConnManager>,
}

impl ConnectionReconciler {
    pub fn new(topo: Arc<dyn TopoStore>, conns: Arc<ConnManager>) -> Self {
        Self { topo, conns }
    }
}

#[async_trait]
impl Reconciler for ConnectionReconciler {
    fn name(&self) -> &'static str {
        "connection"
    }

    async fn reconcile(&self, target_id: &TargetId) -> Result<Outcome, ReconcileError> {
        let target = match self.topo.get(target_id).await {
            Ok(target) => target,
            Err(e) if e.is_not_found() => {
                info!(target_id = %target_id, "target gone, disconnecting");
                match self.conns.disconnect(target_id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                return Ok(Outcome::Ack);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(agents) = target.aspects.stratum_agents else {
            debug!(target_id = %target_id, "no stratum agents aspect");
            return Ok(Outcome::Ack);
        };
        let Some(endpoint) = agents.p4rt_endpoint else {
            debug!(target_id = %target_id, "no p4runtime endpoint, nothing to connect");
            return Ok(Outcome::Ack);
        };

        let dest = Destination {
            target_id: target_id.clone(),
            endpoint,
            device_id: agents.device_id,
            role_name: PROVISIONER_ROLE.to_string(),
        };
        match self.conns.connect(dest).await {
            Ok(_) => Ok(Outcome::Ack),
            // A session under a different destination; acknowledged, the
            // operator-driven topology change will disconnect first.
            Err(e) if e.is_already_exists() => Ok(Outcome::Ack),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabricd_domain::{Aspect, StratumAgents};
    use fabricd_southbound::SimFabric;
    use fabricd_topo::{InMemoryTopoStore, TopoObject};

    fn agents(endpoint: Option<&str>) -> StratumAgents {
        StratumAgents {
            p4rt_endpoint: endpoint.map(String::from),
            gnmi_endpoint: None,
            device_id: 1,
        }
    }

    async fn setup(endpoint: Option<&str>) -> (Arc<InMemoryTopoStore>, Arc<ConnManager>, ConnectionReconciler) {
        let fabric = Arc::new(SimFabric::new());
        fabric.add_switch("sw1:20000", 1).await;
        let topo = Arc::new(InMemoryTopoStore::new());
        let conns = Arc::new(ConnManager::new(fabric));
        topo.create(
            TopoObject::entity("spine1")
                .label("pod", "pod01")
                .aspect(Aspect::StratumAgents(agents(endpoint))),
        )
        .await
        .unwrap();
        let reconciler = ConnectionReconciler::new(topo.clone() as Arc<dyn TopoStore>, conns.clone());
        (topo, conns, reconciler)
    }

    #[tokio::test]
    async fn connects_target_with_endpoint() {
        let (_topo, conns, reconciler) = setup(Some("sw1:20000")).await;

        let outcome = reconciler.reconcile(&TargetId::new("spine1")).await.unwrap();
        assert_eq!(outcome, Outcome::Ack);
        assert!(conns.get_by_target(&TargetId::new("spine1")).await.is_ok());

        // A second pass is a no-op on the same session.
        let conn = conns.get_by_target(&TargetId::new("spine1")).await.unwrap();
        reconciler.reconcile(&TargetId::new("spine1")).await.unwrap();
        let again = conns.get_by_target(&TargetId::new("spine1")).await.unwrap();
        assert_eq!(conn.id(), again.id());
    }

    #[tokio::test]
    async fn acks_target_without_endpoint() {
        let (_topo, conns, reconciler) = setup(None).await;

        let outcome = reconciler.reconcile(&TargetId::new("spine1")).await.unwrap();
        assert_eq!(outcome, Outcome::Ack);
        assert!(conns
            .get_by_target(&TargetId::new("spine1"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn removed_target_is_disconnected() {
        let (topo, conns, reconciler) = setup(Some("sw1:20000")).await;
        reconciler.reconcile(&TargetId::new("spine1")).await.unwrap();
        assert!(conns.get_by_target(&TargetId::new("spine1")).await.is_ok());

        topo.delete(&TargetId::new("spine1")).await.unwrap();
        let outcome = reconciler.reconcile(&TargetId::new("spine1")).await.unwrap();
        assert_eq!(outcome, Outcome::Ack);
        assert!(conns
            .get_by_target(&TargetId::new("spine1"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn unreachable_device_is_retried() {
        let fabric = Arc::new(SimFabric::new());
        let switch = fabric.add_switch("sw1:20000", 1).await;
        switch.set_reachable(false);
        let topo = Arc::new(InMemoryTopoStore::new());
        let conns = Arc::new(ConnManager::new(fabric));
        topo.create(
            TopoObject::entity("spine1")
                .aspect(Aspect::StratumAgents(agents(Some("sw1:20000")))),
        )
        .await
        .unwrap();
        let reconciler = ConnectionReconciler::new(topo as Arc<dyn TopoStore>, conns);

        assert!(reconciler.reconcile(&TargetId::new("spine1")).await.is_err());
    }
}
