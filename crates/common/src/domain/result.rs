use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Packet {0} has no timestamp field named '{1}'")]
    MissingTimestamp(u64, String),

    #[error("Packet {0} field '{1}' is not a timestamp")]
    InvalidTimestamp(u64, String),

    #[error("Packet {0} still carries binary field '{1}'")]
    BinaryFieldInWireForm(u64, String),

    #[error("Unclassifiable packet: {0}")]
    UnclassifiablePacket(String),

    #[error("Invalid routing key: {0}")]
    InvalidRoutingKey(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Publish error: {0}")]
    PublishError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Whether redelivering the same input could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DomainError::PublishError(_)
                | DomainError::StorageError(_)
                | DomainError::RepositoryError(_)
        )
    }
}
