pub mod aspects;
pub mod error;
pub mod types;

mod tests;

pub use aspects::{
    Aspect, AspectKind, ChassisConfigState, DeviceConfig, P4rtMastershipState,
    PipelineConfigState, StratumAgents,
};
pub use error::DomainError;
pub use types::{
    Artifacts, ConfigId, ConfigKind, ConfigRecord, ConfigStatus, PipelineAction, TargetId,
    ARTIFACT_CHASSIS, ARTIFACT_P4BIN, ARTIFACT_P4INFO, PROVISIONER_ROLE,
};
