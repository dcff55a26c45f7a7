//! Storage engine: chunked byte storage, the metadata index, byte-range
//! resolution and the service that ties them into an object lifecycle.

pub mod chunk_store;
pub mod error;
pub mod metadata_index;
pub mod range;
pub mod storage_service;

pub use error::{StorageError, StorageResult};
