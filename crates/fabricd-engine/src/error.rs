use std::time::Duration;

use fabricd_domain::ConfigId;
use fabricd_inventory::InventoryError;
use fabricd_southbound::SouthboundError;
use fabricd_topo::TopoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("topology error: {0}")]
    Topo(#[from] TopoError),

    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("southbound error: {0}")]
    Southbound(#[from] SouthboundError),

    #[error("config {config_id} is missing required artifact '{name}'")]
    MissingArtifact { config_id: ConfigId, name: String },

    #[error("reconcile timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal engine error: {0}")]
    Internal(String),
}
