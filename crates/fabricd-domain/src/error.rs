use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown config kind: {0}")]
    UnknownKind(String),

    #[error("unknown pipeline action: {0}")]
    UnknownAction(String),
}
