use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopoError {
    #[error("topology object not found: {0}")]
    NotFound(String),

    #[error("topology object already exists: {0}")]
    AlreadyExists(String),

    #[error("revision conflict on {id}: expected {expected}, got {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },

    #[error("internal topology error: {0}")]
    Internal(String),
}

impl TopoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TopoError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, TopoError::Conflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, TopoError::AlreadyExists(_))
    }
}

/// Terminal conditions of a watch stream. Both force the watcher to restart;
/// `Lagged` means the bounded buffer overflowed and events were dropped.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch stream lagged by {0} events")]
    Lagged(u64),

    #[error("watch stream closed")]
    Closed,
}
