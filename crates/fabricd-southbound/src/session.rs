use std::sync::Arc;

use async_trait::async_trait;
use fabricd_domain::{PipelineAction, TargetId};
use prost::Message;

use crate::error::SouthboundError;
use crate::proto::p4rt::{set_forwarding_pipeline_config_request::Action, Role, Uint128};
use crate::proto::stratum::{P4RoleConfig, P4_ROLE_CONFIG_TYPE_URL};

/// Where and as whom to open a P4Runtime session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub target_id: TargetId,
    pub endpoint: String,
    pub device_id: u64,
    pub role_name: String,
}

// ── Election identifiers ─────────────────────────────────────────────────────

/// A mastership election id. Generated from a monotonic nanosecond clock, so
/// later elections always outrank earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElectionId(pub u64);

impl ElectionId {
    /// True when the wire value echoes exactly this id.
    pub fn matches(&self, wire: &Uint128) -> bool {
        wire.high == 0 && wire.low == self.0
    }
}

impl From<ElectionId> for Uint128 {
    fn from(id: ElectionId) -> Self {
        Uint128 { high: 0, low: id.0 }
    }
}

impl std::fmt::Display for ElectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the Stratum-shaped role descriptor the engine arbitrates under:
/// no packet-in delivery, pipeline pushes allowed.
pub fn stratum_role(name: &str) -> Role {
    let config = P4RoleConfig {
        receives_packet_ins: false,
        can_push_pipeline: true,
        ..Default::default()
    };
    Role {
        id: 0,
        name: name.to_string(),
        config: Some(prost_types::Any {
            type_url: P4_ROLE_CONFIG_TYPE_URL.to_string(),
            value: config.encode_to_vec(),
        }),
    }
}

/// Checks that artifact bytes decode as a binary P4Info message. The decoded
/// header is returned for logging; callers embed the original bytes.
pub fn decode_p4info(bytes: &[u8]) -> Result<crate::proto::p4rt::P4Info, SouthboundError> {
    crate::proto::p4rt::P4Info::decode(bytes)
        .map_err(|e| SouthboundError::Invalid(format!("malformed p4info artifact: {}", e)))
}

// ── Pipeline push parameters ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub action: PipelineAction,
    /// Binary-encoded P4Info, embedded verbatim.
    pub p4info: Vec<u8>,
    pub p4bin: Vec<u8>,
    pub cookie: u64,
}

/// 1:1 mapping onto the P4Runtime action enum.
pub fn action_to_proto(action: PipelineAction) -> Action {
    match action {
        PipelineAction::Verify => Action::Verify,
        PipelineAction::VerifyAndSave => Action::VerifyAndSave,
        PipelineAction::VerifyAndCommit => Action::VerifyAndCommit,
        PipelineAction::Commit => Action::Commit,
        PipelineAction::ReconcileAndCommit => Action::ReconcileAndCommit,
    }
}

// ── Session seams ────────────────────────────────────────────────────────────

/// One live P4Runtime stream to a device.
///
/// Mastership is per-session state: `arbitrate` must succeed before
/// `set_pipeline`, and a `NotMaster` failure is retryable without reopening
/// the session.
#[async_trait]
pub trait P4rtSession: Send + Sync {
    /// Proposes `election_id` on the stream. Ok means the device echoed the
    /// exact id back and this session is master.
    async fn arbitrate(&self, election_id: ElectionId) -> Result<(), SouthboundError>;

    /// COOKIE_ONLY GetForwardingPipelineConfig; 0 means no config applied.
    async fn pipeline_cookie(&self) -> Result<u64, SouthboundError>;

    /// Pushes the pipeline under the last won election id.
    async fn set_pipeline(&self, spec: PipelineSpec) -> Result<(), SouthboundError>;

    /// Terminates the stream. Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait P4rtConnector: Send + Sync + 'static {
    /// Dials the destination and opens the bidirectional stream. Arbitration
    /// is the caller's first move.
    async fn open(&self, dest: &Destination) -> Result<Arc<dyn P4rtSession>, SouthboundError>;
}

/// A short-lived gNMI channel, opened per chassis apply.
#[async_trait]
pub trait GnmiClient: Send + Sync {
    /// Single Set with one Replace at the root path.
    async fn set_root(&mut self, config: &[u8]) -> Result<(), SouthboundError>;
}

#[async_trait]
pub trait GnmiConnector: Send + Sync + 'static {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn GnmiClient>, SouthboundError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_id_matches_exact_echo_only() {
        let id = ElectionId(42);
        assert!(id.matches(&Uint128 { high: 0, low: 42 }));
        assert!(!id.matches(&Uint128 { high: 0, low: 41 }));
        assert!(!id.matches(&Uint128 { high: 1, low: 42 }));
    }

    #[test]
    fn stratum_role_carries_push_capability() {
        let role = stratum_role("provisioner");
        assert_eq!(role.name, "provisioner");
        let any = role.config.unwrap();
        assert_eq!(any.type_url, P4_ROLE_CONFIG_TYPE_URL);
        let config = P4RoleConfig::decode(any.value.as_slice()).unwrap();
        assert!(config.can_push_pipeline);
        assert!(!config.receives_packet_ins);
    }

    #[test]
    fn actions_map_one_to_one() {
        assert_eq!(action_to_proto(PipelineAction::Verify), Action::Verify);
        assert_eq!(
            action_to_proto(PipelineAction::VerifyAndSave),
            Action::VerifyAndSave
        );
        assert_eq!(
            action_to_proto(PipelineAction::VerifyAndCommit),
            Action::VerifyAndCommit
        );
        assert_eq!(action_to_proto(PipelineAction::Commit), Action::Commit);
        assert_eq!(
            action_to_proto(PipelineAction::ReconcileAndCommit),
            Action::ReconcileAndCommit
        );
    }
}
