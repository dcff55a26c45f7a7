//! src/services/storage_service.rs
//!
//! StorageService handles upload, read and delete of chunked objects. Bytes go to
//! the `ChunkStore`, metadata to the SQLite-backed `MetadataIndex`. An object
//! is published by inserting its metadata row, which happens only after all of
//! its chunks are durable.

use crate::{
    models::object::{ContentKind, StoredObject},
    services::{
        chunk_store::{ByteStream, ChunkStore},
        error::{StorageError, StorageResult},
        metadata_index::MetadataIndex,
        range::{ByteRange, RangeSpec},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use rand::{RngCore, rngs::OsRng};
use std::{
    io,
    time::{Duration, SystemTime},
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

const OBJECT_ID_ENTROPY_BYTES: usize = 16;
const MAX_EXTENSION_LEN: usize = 16;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const CHUNK_DELETE_ATTEMPTS: u32 = 3;
const CHUNK_DELETE_BACKOFF: Duration = Duration::from_millis(50);

/// A readable object: its record, the resolved range (if any) and the bytes.
pub struct ObjectBody {
    pub object: StoredObject,
    /// `None` for whole-object reads.
    pub range: Option<ByteRange>,
    pub stream: ByteStream,
}

impl ObjectBody {
    /// Number of bytes `stream` will yield.
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.object.size(), |range| range.len())
    }
}

/// StorageService provides the object lifecycle:
/// - Upload (stream chunks, then publish metadata)
/// - Lookup and listing (metadata only)
/// - Read (whole object or a single byte range, streamed lazily)
/// - Delete (metadata first, then chunks)
#[derive(Clone)]
pub struct StorageService {
    index: MetadataIndex,
    chunks: ChunkStore,
}

impl StorageService {
    pub fn new(index: MetadataIndex, chunks: ChunkStore) -> Self {
        Self { index, chunks }
    }

    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    /// Stream-upload a new object.
    ///
    /// - Generates a fresh id from 16 random bytes plus the filename extension.
    /// - Resolves the content type (declared, guessed, or octet-stream).
    /// - Writes chunks, then inserts the metadata row.
    ///
    /// A failed or abandoned upload leaves neither a row nor chunks behind.
    pub async fn upload<S>(
        &self,
        display_name: &str,
        declared_content_type: Option<&str>,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let id = generate_object_id(display_name);
        self.upload_as(id, display_name, declared_content_type, stream)
            .await
    }

    async fn upload_as<S>(
        &self,
        id: String,
        display_name: &str,
        declared_content_type: Option<&str>,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let content_type = resolve_content_type(declared_content_type, display_name);
        let pending = PendingChunks::new(self.chunks.clone(), id.clone());

        let written = match self.chunks.write(&id, stream).await {
            Ok(written) => written,
            Err(err) => {
                // the chunk store already removed what it wrote
                pending.disarm();
                warn!(object_id = %id, error = %err, "upload aborted");
                return Err(err);
            }
        };

        let record = StoredObject {
            id,
            display_name: display_name.to_string(),
            kind: ContentKind::from_content_type(&content_type),
            content_type,
            size_bytes: written.size as i64,
            chunk_size: self.chunks.chunk_size() as i64,
            md5: written.md5,
            created_at: Utc::now(),
        };

        // Publishing runs detached and owns the guard: once the insert has
        // started, dropping this future must not remove the chunks under it.
        let index = self.index.clone();
        let publish = tokio::spawn(async move {
            match index.insert(&record).await {
                Ok(()) => {
                    pending.disarm();
                    Ok(record)
                }
                Err(err) => {
                    pending.discard().await;
                    Err(err)
                }
            }
        });
        let record = publish
            .await
            .map_err(|err| StorageError::Io(io::Error::other(err)))??;

        info!(
            object_id = %record.id,
            display_name = %record.display_name,
            content_type = %record.content_type,
            size = record.size_bytes,
            "published object"
        );
        Ok(record)
    }

    pub async fn list(&self) -> StorageResult<Vec<StoredObject>> {
        self.index.list_all().await
    }

    /// Look `name` up as an object id first, then as a display name.
    pub async fn resolve(&self, name: &str) -> StorageResult<StoredObject> {
        match self.index.find_by_id(name).await {
            Err(StorageError::NotFound(_)) => self.index.find_by_name(name).await,
            other => other,
        }
    }

    /// Open `object` for reading.
    ///
    /// Without a range header the whole object is streamed. With one, the
    /// header is parsed and resolved against the stored size; malformed
    /// headers yield `InvalidRange`, ranges outside the object
    /// `RangeNotSatisfiable`.
    pub async fn read(
        &self,
        object: StoredObject,
        range_header: Option<&str>,
    ) -> StorageResult<ObjectBody> {
        let Some(header) = range_header else {
            let stream = self.chunks.read_all(&object.id, object.size()).await?;
            return Ok(ObjectBody {
                object,
                range: None,
                stream,
            });
        };

        let range = RangeSpec::parse(header)?.resolve(object.size())?;
        let stream = self
            .chunks
            .read_range(&object.id, range.start, range.end)
            .await?;
        debug!(
            object_id = %object.id,
            "serving {}",
            range.content_range(object.size())
        );
        Ok(ObjectBody {
            object,
            range: Some(range),
            stream,
        })
    }

    /// Delete the metadata row for `id`, then its chunks.
    ///
    /// Returns whether a row existed. Chunk removal is retried; if it keeps
    /// failing the leak is logged and the delete still succeeds, since no
    /// reader can reach the chunks once the row is gone.
    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        if !self.index.delete(id).await? {
            debug!(object_id = %id, "delete of unknown object");
            return Ok(false);
        }

        let mut attempt = 1;
        loop {
            match self.chunks.delete(id).await {
                Ok(()) => break,
                Err(err) if attempt < CHUNK_DELETE_ATTEMPTS => {
                    debug!(object_id = %id, attempt, error = %err, "retrying chunk removal");
                    tokio::time::sleep(CHUNK_DELETE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    let leak = StorageError::StorageLeak {
                        id: id.to_string(),
                        reason: err.to_string(),
                    };
                    warn!(object_id = %id, error = %leak, "orphaned chunks need reconciliation");
                    break;
                }
            }
        }

        info!(object_id = %id, "deleted object");
        Ok(true)
    }

    /// Purge chunk directories that have no metadata row and have not been
    /// touched for at least `grace`. Returns how many objects were removed.
    pub async fn reconcile_orphans(&self, grace: Duration) -> StorageResult<usize> {
        let now = SystemTime::now();
        let mut purged = 0;
        for (id, modified) in self.chunks.list_objects().await? {
            if self.index.contains(&id).await? {
                continue;
            }
            let age = now.duration_since(modified).unwrap_or_default();
            if age < grace {
                debug!(object_id = %id, "skipping recent unpublished chunks");
                continue;
            }
            match self.chunks.delete(&id).await {
                Ok(()) => purged += 1,
                Err(err) => warn!(object_id = %id, error = %err, "skipping unremovable chunk directory"),
            }
        }
        if purged > 0 {
            info!("purged {} orphaned objects from the chunk store", purged);
        }
        Ok(purged)
    }
}

/// Chunks of an upload that has not been published yet.
///
/// Dropping it while armed (the request was cancelled mid-stream) schedules
/// their removal.
struct PendingChunks {
    chunks: ChunkStore,
    id: String,
    armed: bool,
}

impl PendingChunks {
    fn new(chunks: ChunkStore, id: String) -> Self {
        Self {
            chunks,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn discard(mut self) {
        self.armed = false;
        if let Err(err) = self.chunks.delete(&self.id).await {
            warn!(object_id = %self.id, error = %err, "failed to remove unpublished chunks");
        }
    }
}

impl Drop for PendingChunks {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let chunks = self.chunks.clone();
        let id = std::mem::take(&mut self.id);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match chunks.delete(&id).await {
                        Ok(()) => debug!(object_id = %id, "removed chunks of cancelled upload"),
                        Err(err) => {
                            warn!(object_id = %id, error = %err, "failed to remove chunks of cancelled upload")
                        }
                    }
                });
            }
            Err(_) => warn!(object_id = %id, "cancelled upload left chunks behind"),
        }
    }
}

/// `hex(16 random bytes) + extension_of(display_name)`.
pub fn generate_object_id(display_name: &str) -> String {
    let mut entropy = [0u8; OBJECT_ID_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut entropy);
    format!("{}{}", hex::encode(entropy), extension_of(display_name))
}

/// Extension of a client filename, including the dot.
///
/// Empty when the basename has no dot, starts with its only dot, or the
/// suffix is not a short run of `[A-Za-z0-9_-]`; the result ends up in a
/// storage path.
pub fn extension_of(name: &str) -> &str {
    let basename = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let Some(dot) = basename.rfind('.') else {
        return "";
    };
    if dot == 0 {
        return "";
    }
    let ext = &basename[dot..];
    let suffix = &ext[1..];
    let valid = suffix.len() <= MAX_EXTENSION_LEN
        && suffix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'));
    if valid { ext } else { "" }
}

/// Declared type if present, else a guess from the filename, else
/// `application/octet-stream`.
pub fn resolve_content_type(declared: Option<&str>, display_name: &str) -> String {
    match declared.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value.to_string(),
        None => mime_guess::from_path(display_name)
            .first()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
    }
}
