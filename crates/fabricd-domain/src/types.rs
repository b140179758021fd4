use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Role under which the engine arbitrates mastership on a device stream.
pub const PROVISIONER_ROLE: &str = "provisioner";

/// Artifact carrying the P4Info schema of a pipeline configuration.
pub const ARTIFACT_P4INFO: &str = "p4info";
/// Artifact carrying the target-specific pipeline binary.
pub const ARTIFACT_P4BIN: &str = "p4bin";
/// Artifact carrying the gNMI chassis configuration blob.
pub const ARTIFACT_CHASSIS: &str = "chassis";

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Identifies a device; doubles as the topology entity ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(s: impl Into<String>) -> Self {
        TargetId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a configuration in the inventory; unique across kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigId(pub String);

impl ConfigId {
    pub fn new(s: impl Into<String>) -> Self {
        ConfigId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Configuration records ────────────────────────────────────────────────────

/// Artifact bytes keyed by artifact name. A BTreeMap so the artifact list on
/// the record comes out in a stable order.
pub type Artifacts = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    Pipeline,
    Chassis,
}

impl ConfigKind {
    /// On-disk directory name for artifacts of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Pipeline => "pipeline",
            ConfigKind::Chassis => "chassis",
        }
    }
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConfigKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" => Ok(ConfigKind::Pipeline),
            "chassis" => Ok(ConfigKind::Chassis),
            other => Err(DomainError::UnknownKind(other.to_string())),
        }
    }
}

/// Inventory entry for one configuration. `artifacts` lists exactly the
/// artifact names present on disk for this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub config_id: ConfigId,
    pub kind: ConfigKind,
    pub artifacts: Vec<String>,
}

impl ConfigRecord {
    pub fn new(config_id: impl Into<String>, kind: ConfigKind) -> Self {
        Self {
            config_id: ConfigId::new(config_id),
            kind,
            artifacts: Vec::new(),
        }
    }
}

// ── Observed configuration status ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStatus {
    /// Intent recorded; apply not yet confirmed.
    #[default]
    Pending,
    /// Last apply succeeded and was observed on the device.
    Applied,
    /// Last apply failed; re-armed on the next event or sweep.
    Failed,
}

impl std::fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfigStatus::Pending => "pending",
            ConfigStatus::Applied => "applied",
            ConfigStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// ── Pipeline set action ──────────────────────────────────────────────────────

/// P4Runtime SetForwardingPipelineConfig action. Maps 1:1 onto the wire enum;
/// the device config may carry one explicitly, otherwise `VerifyAndCommit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineAction {
    Verify,
    VerifyAndSave,
    #[default]
    VerifyAndCommit,
    Commit,
    ReconcileAndCommit,
}

impl std::fmt::Display for PipelineAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineAction::Verify => "verify",
            PipelineAction::VerifyAndSave => "verify_and_save",
            PipelineAction::VerifyAndCommit => "verify_and_commit",
            PipelineAction::Commit => "commit",
            PipelineAction::ReconcileAndCommit => "reconcile_and_commit",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PipelineAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify" => Ok(PipelineAction::Verify),
            "verify_and_save" => Ok(PipelineAction::VerifyAndSave),
            "verify_and_commit" => Ok(PipelineAction::VerifyAndCommit),
            "commit" => Ok(PipelineAction::Commit),
            "reconcile_and_commit" => Ok(PipelineAction::ReconcileAndCommit),
            other => Err(DomainError::UnknownAction(other.to_string())),
        }
    }
}
