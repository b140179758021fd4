use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("config not found: {0}")]
    NotFound(String),

    #[error("config already exists: {0}")]
    AlreadyExists(String),

    #[error("artifact io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl InventoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InventoryError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, InventoryError::AlreadyExists(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, InventoryError::Invalid(_))
    }
}
