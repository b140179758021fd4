use thiserror::Error;

#[derive(Debug, Error)]
pub enum SouthboundError {
    #[error("connection not found: {0}")]
    NotFound(String),

    #[error("connection already exists: {0}")]
    AlreadyExists(String),

    /// Mastership was denied or lost. Retryable; never tears the session down.
    #[error("not master for {0}")]
    NotMaster(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("invalid southbound request: {0}")]
    Invalid(String),
}

impl SouthboundError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SouthboundError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, SouthboundError::AlreadyExists(_))
    }

    pub fn is_not_master(&self) -> bool {
        matches!(self, SouthboundError::NotMaster(_))
    }
}
