use thiserror::Error;

use crate::sync::codec::SyncDecodeError;

/// Errors raised by the store, the replicator and the command router.
#[derive(Debug, Error)]
pub enum BbsError {
    /// Malformed step input or record field; the caller re-prompts.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Read or delete target is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Delete requested by someone other than the owner.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Sync payload that could not be parsed.
    #[error("sync decode error: {0}")]
    Decode(#[from] SyncDecodeError),

    /// Outbound queue closed or link refused a send.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::transaction::TransactionError<BbsError>> for BbsError {
    fn from(e: sled::transaction::TransactionError<BbsError>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(inner) => BbsError::Sled(inner),
        }
    }
}

pub type BbsResult<T> = Result<T, BbsError>;
