use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use fabricd_domain::{
    ConfigStatus, DeviceConfig, PipelineConfigState, TargetId, ARTIFACT_P4BIN, ARTIFACT_P4INFO,
};
use fabricd_inventory::ConfigStore;
use fabricd_southbound::{decode_p4info, ConnManager, PipelineSpec, SouthboundError};
use fabricd_topo::TopoStore;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::reconcile::{Outcome, Reconciler};
use crate::util::{load_artifacts, update_aspects, WriteResult};

/// Drives each device's installed forwarding pipeline toward the declared
/// `PipelineConfigID`, using the cookie as the only observable of what the
/// device currently runs.
pub struct PipelineReconciler {
    topo: Arc<dyn TopoStore>,
    inventory: Arc<dyn ConfigStore>,
    conns: Arc<ConnManager>,
    requeue_interval: Duration,
}

/// Cookies are wall-clock nanoseconds, like election ids.
fn new_cookie() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

impl PipelineReconciler {
    pub fn new(
        topo: Arc<dyn TopoStore>,
        inventory: Arc<dyn ConfigStore>,
        conns: Arc<ConnManager>,
        requeue_interval: Duration,
    ) -> Self {
        Self {
            topo,
            inventory,
            conns,
            requeue_interval,
        }
    }

    async fn write_state(
        &self,
        target_id: &TargetId,
        state: PipelineConfigState,
    ) -> Result<WriteResult, ReconcileError> {
        update_aspects(&self.topo, target_id, |aspects| {
            aspects.pipeline_config_state = Some(state);
        })
        .await
    }

    /// Steady state: confirm the device still carries the recorded cookie.
    /// A rebooted device reports cookie 0 and drops back to PENDING.
    async fn verify_applied(
        &self,
        target_id: &TargetId,
        state: &PipelineConfigState,
    ) -> Result<Outcome, ReconcileError> {
        let conn = match self.conns.get_by_target(target_id).await {
            Ok(conn) => conn,
            // No session to check against; the next sweep tries again.
            Err(e) if e.is_not_found() => return Ok(Outcome::RequeueAfter(self.requeue_interval)),
            Err(e) => return Err(e.into()),
        };
        let device_cookie = match conn.pipeline_cookie().await {
            Ok(cookie) => cookie,
            Err(e) => {
                self.record_failure(target_id, state).await?;
                return Err(e.into());
            }
        };
        if device_cookie == state.cookie && device_cookie > 0 {
            return Ok(Outcome::RequeueAfter(self.requeue_interval));
        }

        info!(
            target_id = %target_id,
            recorded = state.cookie,
            observed = device_cookie,
            "device no longer carries applied pipeline, re-entering pending"
        );
        let mut pending = state.clone();
        pending.status = ConfigStatus::Pending;
        pending.cookie = 0;
        pending.updated = Utc::now();
        self.write_state(target_id, pending).await?;
        Ok(Outcome::Requeue)
    }

    /// PENDING: load artifacts, win mastership, short-circuit on a matching
    /// cookie, otherwise push the pipeline.
    async fn drive_pending(
        &self,
        target_id: &TargetId,
        device_config: &DeviceConfig,
        state: &PipelineConfigState,
    ) -> Result<Outcome, ReconcileError> {
        let artifacts = load_artifacts(
            &self.inventory,
            &state.config_id,
            &[ARTIFACT_P4INFO, ARTIFACT_P4BIN],
        )
        .await?;

        // Intent exists but the session may not yet; the connection loop
        // drives it up and its event re-triggers us.
        let conn = self.conns.get_by_target(target_id).await?;

        conn.arbitrate().await?;

        let device_cookie = conn.pipeline_cookie().await?;
        if device_cookie == state.cookie && device_cookie > 0 {
            debug!(target_id = %target_id, cookie = device_cookie, "device already carries this pipeline");
            let mut applied = state.clone();
            applied.status = ConfigStatus::Applied;
            applied.updated = Utc::now();
            self.write_state(target_id, applied).await?;
            return Ok(Outcome::RequeueAfter(self.requeue_interval));
        }

        let p4info = artifacts[ARTIFACT_P4INFO].clone();
        let header = decode_p4info(&p4info)?;
        if let Some(pkg) = header.pkg_info {
            debug!(target_id = %target_id, pkg = %pkg.name, version = %pkg.version, "pushing pipeline");
        }

        let cookie = new_cookie();
        conn.set_pipeline(PipelineSpec {
            action: device_config.pipeline_action.unwrap_or_default(),
            p4info,
            p4bin: artifacts[ARTIFACT_P4BIN].clone(),
            cookie,
        })
        .await?;

        info!(target_id = %target_id, config_id = %state.config_id, cookie, "pipeline configured");
        let mut applied = state.clone();
        applied.status = ConfigStatus::Applied;
        applied.cookie = cookie;
        applied.updated = Utc::now();
        self.write_state(target_id, applied).await?;
        Ok(Outcome::RequeueAfter(self.requeue_interval))
    }

    async fn record_failure(
        &self,
        target_id: &TargetId,
        state: &PipelineConfigState,
    ) -> Result<(), ReconcileError> {
        let mut failed = state.clone();
        failed.status = ConfigStatus::Failed;
        failed.cookie = 0;
        failed.updated = Utc::now();
        self.write_state(target_id, failed).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for PipelineReconciler {
    fn name(&self) -> &'static str {
        "pipeline"
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
        let Some(pipeline_id) = device_config
            .pipeline_config_id
            .clone()
            .filter(|id| !id.is_empty())
        else {
            debug!(target_id = %target_id, "no pipeline config declared");
            return Ok(Outcome::Ack);
        };

        let mastership = target.aspects.p4rt_mastership.clone();
        let state = target.aspects.pipeline_config_state.clone();

        // A newer mastership term re-arms the state machine before anything
        // else happens.
        if let (Some(m), Some(s)) = (mastership.as_ref(), state.as_ref()) {
            if m.term > s.term {
                info!(target_id = %target_id, term = m.term, "mastership changed, re-entering pending");
                self.write_state(
                    target_id,
                    PipelineConfigState {
                        config_id: pipeline_id,
                        updated: Utc::now(),
                        status: ConfigStatus::Pending,
                        cookie: 0,
                        master: Some(m.node_id.clone()),
                        term: m.term,
                    },
                )
                .await?;
                return Ok(Outcome::Requeue);
            }
        }

        // Initialize or re-target the observed state.
        let state = match state {
            Some(s) if s.config_id == pipeline_id => s,
            _ => {
                info!(target_id = %target_id, config_id = %pipeline_id, "recording pending pipeline config");
                self.write_state(
                    target_id,
                    PipelineConfigState {
                        config_id: pipeline_id,
                        updated: Utc::now(),
                        status: ConfigStatus::Pending,
                        cookie: 0,
                        master: mastership.as_ref().map(|m| m.node_id.clone()),
                        term: mastership.as_ref().map(|m| m.term).unwrap_or(0),
                    },
                )
                .await?;
                return Ok(Outcome::Requeue);
            }
        };

        match state.status {
            ConfigStatus::Applied => self.verify_applied(target_id, &state).await,
            ConfigStatus::Failed => {
                // Re-armed at the next event or sweep, which is now.
                info!(target_id = %target_id, config_id = %state.config_id, "re-arming failed pipeline config");
                let mut rearmed = state.clone();
                rearmed.status = ConfigStatus::Pending;
                rearmed.cookie = 0;
                rearmed.updated = Utc::now();
                self.write_state(target_id, rearmed).await?;
                Ok(Outcome::Requeue)
            }
            ConfigStatus::Pending => {
                match self.drive_pending(target_id, &device_config, &state).await {
                    Ok(outcome) => Ok(outcome),
                    Err(ReconcileError::Southbound(e)) if is_apply_failure(&e) => {
                        warn!(target_id = %target_id, error = %e, "pipeline apply failed");
                        self.record_failure(target_id, &state).await?;
                        Err(e.into())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

/// Southbound failures that mark the state FAILED. A missing session or a
/// lost election just retries: the former is the connection loop's job and
/// the latter is transient by design.
fn is_apply_failure(e: &SouthboundError) -> bool {
    !e.is_not_found() && !e.is_not_master()
}
