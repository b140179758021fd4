//! Helpers shared by the three reconcilers: aspect write-back and artifact
//! loading.

use std::sync::Arc;

use fabricd_domain::{Artifacts, ConfigId, TargetId};
use fabricd_inventory::ConfigStore;
use fabricd_topo::{object::Aspects, TopoStore};
use tracing::warn;

use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Updated,
    /// The mutation was a no-op; nothing was written, no event fires. This is
    /// what breaks the write-event-reconcile cycle.
    Unchanged,
    /// Lost the optimistic-concurrency race. Soft: the next event or sweep
    /// re-converges.
    Conflict,
}

/// Re-reads the object, applies `mutate` to its aspects and writes it back
/// under the fresh revision.
pub async fn update_aspects<F>(
    topo: &Arc<dyn TopoStore>,
    target_id: &TargetId,
    mutate: F,
) -> Result<WriteResult, ReconcileError>
where
    F: FnOnce(&mut Aspects) + Send,
{
    let mut object = topo.get(target_id).await?;
    let before = object.aspects.clone();
    mutate(&mut object.aspects);
    if object.aspects == before {
        return Ok(WriteResult::Unchanged);
    }
    match topo.update(object).await {
        Ok(_) => Ok(WriteResult::Updated),
        Err(e) if e.is_conflict() => {
            warn!(target_id = %target_id, error = %e, "aspect write conflict");
            Ok(WriteResult::Conflict)
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetches the record and artifact bytes for a config and verifies the
/// required artifact names are all present.
pub async fn load_artifacts(
    inventory: &Arc<dyn ConfigStore>,
    config_id: &ConfigId,
    required: &[&str],
) -> Result<Artifacts, ReconcileError> {
    let record = inventory.get(config_id).await?;
    let artifacts = inventory.get_artifacts(&record).await?;
    for name in required {
        if !artifacts.contains_key(*name) {
            return Err(ReconcileError::MissingArtifact {
                config_id: config_id.clone(),
                name: (*name).to_string(),
            });
        }
    }
    Ok(artifacts)
}
