use common::domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("unknown wire format '{0}'")]
    UnknownFormat(String),

    #[error("invalid packet schema: {0}")]
    InvalidSchema(String),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("unsupported sensor type: {0}")]
    UnsupportedType(u8),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("field '{field}' cannot be read as {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },

    #[error("packet {0} decoded without any field")]
    EmptyPacket(u64),

    #[error(transparent)]
    Packet(#[from] DomainError),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
