use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConfigId, ConfigStatus, PipelineAction};

// ── Aspect payloads ──────────────────────────────────────────────────────────

/// Connection parameters for a Stratum device, written by whoever registers
/// the device in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StratumAgents {
    pub p4rt_endpoint: Option<String>,
    pub gnmi_endpoint: Option<String>,
    pub device_id: u64,
}

/// Declared intent: which pipeline and chassis configurations the device
/// should be running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceConfig {
    pub pipeline_config_id: Option<ConfigId>,
    pub chassis_config_id: Option<ConfigId>,
    /// Explicit pipeline set action; `VerifyAndCommit` when absent.
    pub pipeline_action: Option<PipelineAction>,
}

/// Observed pipeline configuration state, owned by the pipeline reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfigState {
    pub config_id: ConfigId,
    pub updated: DateTime<Utc>,
    pub status: ConfigStatus,
    /// Cookie echoed by the device for the last successful apply; 0 means
    /// no apply has been observed.
    pub cookie: u64,
    /// Master node and term recorded at the last state transition.
    pub master: Option<String>,
    pub term: u64,
}

/// Observed chassis configuration state, owned by the chassis reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisConfigState {
    pub config_id: ConfigId,
    pub updated: DateTime<Utc>,
    pub status: ConfigStatus,
}

/// Mastership as arbitrated on the device's P4Runtime stream, written
/// externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct P4rtMastershipState {
    pub node_id: String,
    pub term: u64,
}

// ── Tagged union over the known aspects ──────────────────────────────────────

/// Discriminant for aspect presence checks in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AspectKind {
    StratumAgents,
    DeviceConfig,
    PipelineConfigState,
    ChassisConfigState,
    P4rtMastership,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Aspect {
    StratumAgents(StratumAgents),
    DeviceConfig(DeviceConfig),
    PipelineConfigState(PipelineConfigState),
    ChassisConfigState(ChassisConfigState),
    P4rtMastership(P4rtMastershipState),
}

impl Aspect {
    pub fn kind(&self) -> AspectKind {
        match self {
            Aspect::StratumAgents(_) => AspectKind::StratumAgents,
            Aspect::DeviceConfig(_) => AspectKind::DeviceConfig,
            Aspect::PipelineConfigState(_) => AspectKind::PipelineConfigState,
            Aspect::ChassisConfigState(_) => AspectKind::ChassisConfigState,
            Aspect::P4rtMastership(_) => AspectKind::P4rtMastership,
        }
    }
}
