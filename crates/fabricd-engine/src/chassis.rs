use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fabricd_domain::{ChassisConfigState, ConfigStatus, TargetId, ARTIFACT_CHASSIS};
use fabricd_inventory::ConfigStore;
use fabricd_southbound::{GnmiConnector, SouthboundError};
use fabricd_topo::TopoStore;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::reconcile::{Outcome, Reconciler};
use crate::util::{load_artifacts, update_aspects, WriteResult};

/// Drives each device's chassis configuration toward the declared
/// `ChassisConfigID` over a short-lived gNMI channel per apply.
pub struct ChassisReconciler {
    topo: Arc<dyn TopoStore>,
    inventory: Arc<dyn ConfigStore>,
    gnmi: Arc<dyn GnmiConnector>,
}

impl ChassisReconciler {
    pub fn new(
        topo: Arc<dyn TopoStore>,
        inventory: Arc<dyn ConfigStore>,
        gnmi: Arc<dyn GnmiConnector>,
    ) -> Self {
        Self {
            topo,
            inventory,
            gnmi,
        }
    }

    async fn write_state(
        &self,
        target_id: &TargetId,
        state: ChassisConfigState,
    ) -> Result<WriteResult, ReconcileError> {
        update_aspects(&self.topo, target_id, |aspects| {
            aspects.chassis_config_state = Some(state);
        })
        .await
    }

    /// Opens the gNMI channel and replaces the device configuration at the
    /// root path.
    async fn apply(&self, endpoint: &str, config: &[u8]) -> Result<(), SouthboundError> {
        let mut client = self.gnmi.open(endpoint).await?;
        client.set_root(config).await
    }
}

#[async_trait]
impl Reconciler for ChassisReconciler {
    fn name(&self) -> &'static str {
        "chassis"
    }

    async fn reconcile(&self, target_id: &TargetId) -> Result<Outcome, ReconcileError> {
        let target = match self.topo.get(target_id).await {
            Ok(target) => target,
            Err(e) if e.is_not_found() => return Ok(Outcome::Ack),
            Err(e) => return Err(e.into()),
        };
        let Some(device_config) = target.aspects.device_config.clone() else {
            return Ok(Outcome::Ack);
        };
        let Some(chassis_id) = device_config
            .chassis_config_id
            .clone()
            .filter(|id| !id.is_empty())
        else {
            debug!(target_id = %target_id, "no chassis config declared");
            return Ok(Outcome::Ack);
        };

        // Initialize or re-target the observed state.
        let state = match target.aspects.chassis_config_state.clone() {
            Some(s) if s.config_id == chassis_id => s,
            _ => {
                info!(target_id = %target_id, config_id = %chassis_id, "recording pending chassis config");
                self.write_state(
                    target_id,
                    ChassisConfigState {
                        config_id: chassis_id,
                        updated: Utc::now(),
                        status: ConfigStatus::Pending,
                    },
                )
                .await?;
                return Ok(Outcome::Requeue);
            }
        };

        match state.status {
            ConfigStatus::Applied => return Ok(Outcome::Ack),
            ConfigStatus::Failed => {
                info!(target_id = %target_id, config_id = %state.config_id, "re-arming failed chassis config");
                let mut rearmed = state.clone();
                rearmed.status = ConfigStatus::Pending;
                rearmed.updated = Utc::now();
                self.write_state(target_id, rearmed).await?;
                return Ok(Outcome::Requeue);
            }
            ConfigStatus::Pending => {}
        }

        let artifacts = load_artifacts(&self.inventory, &state.config_id, &[ARTIFACT_CHASSIS]).await?;

        let Some(endpoint) = target
            .aspects
            .stratum_agents
            .and_then(|agents| agents.gnmi_endpoint)
        else {
            warn!(target_id = %target_id, "no gnmi endpoint, cannot apply chassis config");
            return Ok(Outcome::Ack);
        };

        match self.apply(&endpoint, &artifacts[ARTIFACT_CHASSIS]).await {
            Ok(()) => {
                info!(target_id = %target_id, config_id = %state.config_id, "chassis config applied");
                let mut applied = state.clone();
                applied.status = ConfigStatus::Applied;
                applied.updated = Utc::now();
                self.write_state(target_id, applied).await?;
                Ok(Outcome::Ack)
            }
            Err(e) => {
                warn!(target_id = %target_id, error = %e, "chassis apply failed");
                let mut failed = state.clone();
                failed.status = ConfigStatus::Failed;
                failed.updated = Utc::now();
                self.write_state(target_id, failed).await?;
                Err(e.into())
            }
        }
    }
}
