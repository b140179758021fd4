use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fabricd_domain::{
    Artifacts, ConfigId, ConfigKind, ConfigRecord, ARTIFACT_CHASSIS, ARTIFACT_P4BIN,
    ARTIFACT_P4INFO,
};
use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::InventoryError;
use crate::store::ConfigStore;

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("config-records");

const ARTIFACT_DIR_MODE: u32 = 0o755;
const ARTIFACT_FILE_MODE: u32 = 0o644;

/// Inventory backed by a redb record table and artifact files laid out as
/// `<root>/<kind>/<config-id>.<artifact-name>`.
#[derive(Clone)]
pub struct DiskConfigStore {
    db: Arc<Database>,
    root: PathBuf,
}

impl DiskConfigStore {
    /// Open (or create) the inventory rooted at `root`. The per-kind artifact
    /// directories and the record database are created as needed.
    pub fn open(root: &Path) -> Result<Self, InventoryError> {
        for kind in [ConfigKind::Pipeline, ConfigKind::Chassis] {
            let dir = root.join(kind.as_str());
            fs::create_dir_all(&dir)
                .and_then(|_| set_mode(&dir, ARTIFACT_DIR_MODE))
                .map_err(|e| io_err(&dir, e))?;
        }

        let db = Database::create(root.join("records.redb"))
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        {
            let wtxn = db
                .begin_write()
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
            wtxn.open_table(RECORDS)
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
            wtxn.commit()
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
        }

        Ok(Self {
            db: Arc::new(db),
            root: root.to_path_buf(),
        })
    }

    fn artifact_path(&self, record: &ConfigRecord, name: &str) -> PathBuf {
        self.root
            .join(record.kind.as_str())
            .join(format!("{}.{}", record.config_id, name))
    }

    fn contains(&self, config_id: &ConfigId) -> Result<bool, InventoryError> {
        let rtxn = self
            .db
            .begin_read()
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        let table = rtxn
            .open_table(RECORDS)
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        Ok(table
            .get(config_id.as_str())
            .map_err(|e| InventoryError::Internal(e.to_string()))?
            .is_some())
    }

    /// Writes all artifact bytes to disk and returns the sorted name list.
    /// Any failure removes the files written so far.
    fn save_artifacts(
        &self,
        record: &ConfigRecord,
        artifacts: &Artifacts,
    ) -> Result<Vec<String>, InventoryError> {
        let mut written = Vec::with_capacity(artifacts.len());
        for (name, data) in artifacts {
            let path = self.artifact_path(record, name);
            written.push(name.clone());
            if let Err(e) = fs::write(&path, data).and_then(|_| set_mode(&path, ARTIFACT_FILE_MODE)) {
                self.remove_artifact_files(record, &written);
                return Err(io_err(&path, e));
            }
        }
        Ok(written)
    }

    fn remove_artifact_files(&self, record: &ConfigRecord, names: &[String]) {
        for name in names {
            let path = self.artifact_path(record, name);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove artifact file");
                }
            }
        }
    }

    fn insert_record(&self, record: &ConfigRecord) -> Result<(), InventoryError> {
        let bytes = serde_json::to_vec(record)?;
        let wtxn = self
            .db
            .begin_write()
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        {
            let mut table = wtxn
                .open_table(RECORDS)
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
            let existing = table
                .get(record.config_id.as_str())
                .map_err(|e| InventoryError::Internal(e.to_string()))?
                .is_some();
            if existing {
                // Unreachable under the one-writer-per-id guarantee; the
                // pre-check in add() already rejected duplicates.
                return Err(InventoryError::AlreadyExists(record.config_id.to_string()));
            }
            table
                .insert(record.config_id.as_str(), bytes.as_slice())
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
        }
        wtxn.commit()
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        Ok(())
    }

    fn remove_record(&self, config_id: &ConfigId) -> Result<ConfigRecord, InventoryError> {
        let wtxn = self
            .db
            .begin_write()
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        let removed = {
            let mut table = wtxn
                .open_table(RECORDS)
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
            let removed_guard = table
                .remove(config_id.as_str())
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
            removed_guard.map(|guard| serde_json::from_slice::<ConfigRecord>(guard.value()))
        };
        let record = match removed {
            Some(r) => r?,
            None => return Err(InventoryError::NotFound(config_id.to_string())),
        };
        wtxn.commit()
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        Ok(record)
    }
}

/// Validates the shape of an add request: a non-empty id and the minimum
/// artifact set for the kind.
fn validate(record: &ConfigRecord, artifacts: &Artifacts) -> Result<(), InventoryError> {
    if record.config_id.is_empty() {
        return Err(InventoryError::Invalid("config id cannot be empty".into()));
    }
    if artifacts.is_empty() {
        return Err(InventoryError::Invalid("artifacts cannot be empty".into()));
    }
    for name in artifacts.keys() {
        if name.is_empty() || name.contains('/') {
            return Err(InventoryError::Invalid(format!(
                "invalid artifact name: {:?}",
                name
            )));
        }
    }
    let required: &[&str] = match record.kind {
        ConfigKind::Pipeline => &[ARTIFACT_P4INFO, ARTIFACT_P4BIN],
        ConfigKind::Chassis => &[ARTIFACT_CHASSIS],
    };
    for name in required {
        if !artifacts.contains_key(*name) {
            return Err(InventoryError::Invalid(format!(
                "{} config '{}' requires artifact '{}'",
                record.kind, record.config_id, name
            )));
        }
    }
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> InventoryError {
    InventoryError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl ConfigStore for DiskConfigStore {
    async fn add(
        &self,
        mut record: ConfigRecord,
        artifacts: Artifacts,
    ) -> Result<ConfigRecord, InventoryError> {
        validate(&record, &artifacts)?;

        // Refuse duplicates before touching disk: the artifact paths of a
        // duplicate are the files the existing record owns.
        if self.contains(&record.config_id)? {
            return Err(InventoryError::AlreadyExists(record.config_id.to_string()));
        }

        info!(config_id = %record.config_id, kind = %record.kind, "adding configuration");
        record.artifacts = self.save_artifacts(&record, &artifacts)?;

        if let Err(e) = self.insert_record(&record) {
            if !e.is_already_exists() {
                self.remove_artifact_files(&record, &record.artifacts);
            }
            return Err(e);
        }
        Ok(record)
    }

    async fn delete(&self, config_id: &ConfigId) -> Result<(), InventoryError> {
        if config_id.is_empty() {
            return Err(InventoryError::Invalid("config id cannot be empty".into()));
        }
        info!(config_id = %config_id, "deleting configuration");
        let record = self.remove_record(config_id)?;
        self.remove_artifact_files(&record, &record.artifacts);
        Ok(())
    }

    async fn get(&self, config_id: &ConfigId) -> Result<ConfigRecord, InventoryError> {
        if config_id.is_empty() {
            return Err(InventoryError::Invalid("config id cannot be empty".into()));
        }
        let rtxn = self
            .db
            .begin_read()
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        let table = rtxn
            .open_table(RECORDS)
            .map_err(|e| InventoryError::Internal(e.to_string()))?;
        match table
            .get(config_id.as_str())
            .map_err(|e| InventoryError::Internal(e.to_string()))?
        {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Err(InventoryError::NotFound(config_id.to_string())),
        }
    }

    async fn get_artifacts(&self, record: &ConfigRecord) -> Result<Artifacts, InventoryError> {
        let mut artifacts = Artifacts::new();
        for name in &record.artifacts {
            let path = self.artifact_path(record, name);
            let data = fs::read(&path).map_err(|e| io_err(&path, e))?;
            artifacts.insert(name.clone(), data);
        }
        Ok(artifacts)
    }

    async fn list(
        &self,
        kind: Option<ConfigKind>,
        sink: mpsc::Sender<ConfigRecord>,
    ) -> Result<(), InventoryError> {
        // Collect under the read transaction, then stream; redb guards must
        // not be held across await points.
        let records = {
            let rtxn = self
                .db
                .begin_read()
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
            let table = rtxn
                .open_table(RECORDS)
                .map_err(|e| InventoryError::Internal(e.to_string()))?;
            let mut records = Vec::new();
            for entry in table
                .iter()
                .map_err(|e| InventoryError::Internal(e.to_string()))?
            {
                let (_k, v) = entry.map_err(|e| InventoryError::Internal(e.to_string()))?;
                let record: ConfigRecord = serde_json::from_slice(v.value())?;
                if kind.map_or(true, |k| record.kind == k) {
                    records.push(record);
                }
            }
            records
        };

        for record in records {
            if sink.send(record).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
