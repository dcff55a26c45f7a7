//! Storage-layer error taxonomy shared by the chunk store, the metadata index
//! and the services built on top of them.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object id `{0}` is not a valid storage key")]
    InvalidObjectId(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("range not satisfiable for an object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },
    #[error("object `{0}` already exists")]
    Conflict(String),
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("chunks of `{id}` were left behind after metadata removal: {reason}")]
    StorageLeak { id: String, reason: String },
    #[error("chunk store was created with {stored}-byte chunks, configured {configured}")]
    ChunkSizeMismatch { stored: u64, configured: u64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
