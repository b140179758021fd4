use async_trait::async_trait;
use fabricd_domain::{Artifacts, ConfigId, ConfigKind, ConfigRecord};
use tokio::sync::mpsc;

use crate::error::InventoryError;

/// Inventory of pipeline and chassis configurations and their artifacts.
///
/// Records are kept in a durable ordered map keyed by [`ConfigId`]; artifact
/// bytes live on disk next to it. A record is only visible once its artifact
/// files are durable, and is removed before its files are, so readers always
/// observe a consistent record/artifacts pair. The caller guarantees at most
/// one writer per config id.
#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    /// Registers a new configuration. Returns the stored record with its
    /// artifact list filled in. Fails with `Invalid` on malformed input and
    /// `AlreadyExists` on a duplicate config id, in which case disk is left
    /// untouched.
    async fn add(
        &self,
        record: ConfigRecord,
        artifacts: Artifacts,
    ) -> Result<ConfigRecord, InventoryError>;

    /// Removes a configuration and, best-effort, its artifact files.
    async fn delete(&self, config_id: &ConfigId) -> Result<(), InventoryError>;

    /// Returns the record for the given config id.
    async fn get(&self, config_id: &ConfigId) -> Result<ConfigRecord, InventoryError>;

    /// Loads the artifact bytes listed on the record from disk.
    async fn get_artifacts(&self, record: &ConfigRecord) -> Result<Artifacts, InventoryError>;

    /// Streams all records of the requested kind (all kinds when `None`) to
    /// the sink, in stable config-id order.
    async fn list(
        &self,
        kind: Option<ConfigKind>,
        sink: mpsc::Sender<ConfigRecord>,
    ) -> Result<(), InventoryError>;
}
