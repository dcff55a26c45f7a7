//! Chunk store: immutable objects persisted as fixed-size chunk files.
//!
//! Layout on disk:
//!
//! ```text
//! root/.chunk-size                      chunk size the store was created with
//! root/{aa}/{bb}/{object_id}/           one directory per object (existence marker)
//! root/{aa}/{bb}/{object_id}/00000000.chunk
//! root/{aa}/{bb}/{object_id}/00000001.chunk
//! ```
//!
//! `aa`/`bb` are the first two bytes of `md5(object_id)`, which keeps directory
//! fan-out bounded. Every chunk except the last is exactly `chunk_size` bytes,
//! so `chunk_index = offset / chunk_size` is all a reader needs.
//!
//! The store knows nothing about publishing: an object directory without a
//! metadata row is simply unreachable, and `delete` is idempotent.

use crate::services::error::{StorageError, StorageResult};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt, pin_mut, stream};
use std::{
    collections::{HashMap, HashSet},
    ffi::OsStr,
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::SystemTime,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    runtime::Handle,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// A boxed, lazily produced sequence of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

const CHUNK_SIZE_MARKER: &str = ".chunk-size";
const CHUNK_EXTENSION: &str = "chunk";
const READ_BUFFER_SIZE: usize = 64 * 1024;
const MAX_OBJECT_ID_LEN: usize = 128;

/// Outcome of streaming one object into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenObject {
    pub size: u64,
    pub chunks: u64,
    /// Lowercase hex MD5 of the full content.
    pub md5: String,
}

/// Readers currently streaming an object, and objects whose purge is waiting
/// for those readers to finish.
#[derive(Default)]
struct LeaseTable {
    readers: HashMap<String, usize>,
    deferred: HashSet<String>,
    purging: HashSet<String>,
}

#[derive(Clone)]
pub struct ChunkStore {
    root: PathBuf,
    chunk_size: u64,
    leases: Arc<Mutex<LeaseTable>>,
}

impl ChunkStore {
    /// Open (or initialise) a chunk store rooted at `root`.
    ///
    /// The first open records `chunk_size` in a marker file; later opens with a
    /// different size fail, since existing objects could no longer be addressed.
    pub async fn open(root: impl Into<PathBuf>, chunk_size: u64) -> StorageResult<Self> {
        if chunk_size == 0 {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                "chunk size must be greater than zero",
            )));
        }
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let marker = root.join(CHUNK_SIZE_MARKER);
        match fs::read_to_string(&marker).await {
            Ok(contents) => {
                let stored = contents.trim().parse::<u64>().map_err(|err| {
                    io::Error::new(
                        ErrorKind::InvalidData,
                        format!("corrupt chunk size marker {}: {}", marker.display(), err),
                    )
                })?;
                if stored != chunk_size {
                    return Err(StorageError::ChunkSizeMismatch {
                        stored,
                        configured: chunk_size,
                    });
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::write(&marker, chunk_size.to_string()).await?;
                debug!("initialised chunk store at {} ({} byte chunks)", root.display(), chunk_size);
            }
            Err(err) => return Err(err.into()),
        }

        Ok(Self {
            root,
            chunk_size,
            leases: Arc::new(Mutex::new(LeaseTable::default())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Directory holding the chunks of `id`: `root/{aa}/{bb}/{id}`.
    pub(crate) fn object_dir(&self, id: &str) -> PathBuf {
        let digest = md5::compute(id.as_bytes());
        let mut path = self.root.clone();
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(id);
        path
    }

    /// Consume `stream` to exhaustion, persisting it as chunks of `id`.
    ///
    /// At most one chunk is buffered. Each chunk is written to a temp file,
    /// fsynced and renamed into place. On failure the object directory is
    /// removed before the error is returned; stream errors surface as
    /// `UploadFailed`, disk errors as `Io`.
    pub async fn write<S>(&self, id: &str, stream: S) -> StorageResult<WrittenObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        ensure_id_safe(id)?;
        let dir = self.object_dir(id);
        fs::create_dir_all(&dir).await?;

        match self.write_chunks(&dir, stream).await {
            Ok(written) => {
                debug!(
                    object_id = %id,
                    size = written.size,
                    chunks = written.chunks,
                    "stored object chunks"
                );
                Ok(written)
            }
            Err(err) => {
                if let Err(cleanup) = self.purge(id).await {
                    warn!(object_id = %id, error = %cleanup, "failed to remove partial chunks");
                }
                Err(err)
            }
        }
    }

    async fn write_chunks<S>(&self, dir: &Path, stream: S) -> StorageResult<WrittenObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let chunk_size = self.chunk_size as usize;
        let mut pending = BytesMut::with_capacity(chunk_size);
        let mut digest = md5::Context::new();
        let mut size: u64 = 0;
        let mut index: u64 = 0;

        pin_mut!(stream);
        while let Some(piece) = stream.next().await {
            let mut piece = piece.map_err(|err| StorageError::UploadFailed(err.to_string()))?;
            size += piece.len() as u64;
            digest.consume(&piece);

            while !piece.is_empty() {
                let take = (chunk_size - pending.len()).min(piece.len());
                pending.extend_from_slice(&piece.split_to(take));
                if pending.len() == chunk_size {
                    write_chunk(dir, index, &pending).await?;
                    pending.clear();
                    index += 1;
                }
            }
        }
        if !pending.is_empty() {
            write_chunk(dir, index, &pending).await?;
            index += 1;
        }

        Ok(WrittenObject {
            size,
            chunks: index,
            md5: format!("{:x}", digest.compute()),
        })
    }

    /// Whether an object directory exists for `id`.
    pub async fn contains(&self, id: &str) -> StorageResult<bool> {
        ensure_id_safe(id)?;
        Ok(fs::try_exists(self.object_dir(id)).await?)
    }

    /// Total bytes stored for `id`, derived from the chunk files.
    pub async fn stored_size(&self, id: &str) -> StorageResult<u64> {
        ensure_id_safe(id)?;
        let dir = self.object_dir(id);
        let mut entries = fs::read_dir(&dir).await.map_err(|err| missing(id, err))?;

        let mut count: u64 = 0;
        let mut last: Option<u64> = None;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = parse_chunk_index(&entry.file_name()) {
                count += 1;
                last = Some(last.map_or(index, |current| current.max(index)));
            }
        }

        match last {
            None => Ok(0),
            Some(last) if last + 1 != count => Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!("object `{}` has {} chunks but last index {}", id, count, last),
            ))),
            Some(last) => {
                let tail = fs::metadata(chunk_path(&dir, last))
                    .await
                    .map_err(|err| missing(id, err))?
                    .len();
                Ok(last * self.chunk_size + tail)
            }
        }
    }

    /// Stream the inclusive byte range `start..=end` of `id`.
    ///
    /// Only the chunks overlapping the range are opened, one at a time; the
    /// first and last are trimmed to the requested sub-range. Bounds are
    /// checked against the chunk holding `end`, not by scanning the object.
    pub async fn read_range(&self, id: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
        ensure_id_safe(id)?;
        let lease = self.acquire(id)?;
        if start > end {
            return Err(StorageError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        self.ensure_stored(id, end).await?;
        Ok(self.stream_range(lease, start, end))
    }

    /// Stream the whole of `id`, which the caller knows to be `size` bytes.
    /// A zero-byte object yields an empty stream.
    pub async fn read_all(&self, id: &str, size: u64) -> StorageResult<ByteStream> {
        ensure_id_safe(id)?;
        let lease = self.acquire(id)?;
        if size == 0 {
            if !fs::try_exists(self.object_dir(id)).await? {
                return Err(StorageError::NotFound(id.to_string()));
            }
            return Ok(Box::pin(stream::empty()));
        }
        self.ensure_stored(id, size - 1).await?;
        Ok(self.stream_range(lease, 0, size - 1))
    }

    /// Check that byte `offset` of `id` is on disk with a single stat of the
    /// chunk that would hold it.
    async fn ensure_stored(&self, id: &str, offset: u64) -> StorageResult<()> {
        let dir = self.object_dir(id);
        let index = offset / self.chunk_size;
        match fs::metadata(chunk_path(&dir, index)).await {
            Ok(meta) if meta.len() > offset % self.chunk_size => Ok(()),
            Ok(meta) => Err(StorageError::InvalidRange(format!(
                "byte {} lies outside object `{}` of {} bytes",
                offset,
                id,
                index * self.chunk_size + meta.len()
            ))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if fs::try_exists(&dir).await? {
                    Err(StorageError::InvalidRange(format!(
                        "byte {} lies outside object `{}`",
                        offset, id
                    )))
                } else {
                    Err(StorageError::NotFound(id.to_string()))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn stream_range(&self, lease: ReadLease, start: u64, end: u64) -> ByteStream {
        let chunk_size = self.chunk_size;
        let dir = self.object_dir(&lease.id);
        let id = lease.id.clone();

        let segments = (start / chunk_size..=end / chunk_size).map(move |index| {
            let chunk_start = index * chunk_size;
            let from = start.max(chunk_start) - chunk_start;
            let to = end.min(chunk_start + chunk_size - 1) - chunk_start;
            (index, from, to - from + 1)
        });

        let chunks = stream::iter(segments)
            .then(move |(index, offset, len)| open_segment(id.clone(), chunk_path(&dir, index), offset, len))
            .try_flatten();

        Box::pin(LeasedStream {
            inner: Box::pin(chunks),
            _lease: lease,
        })
    }

    /// Remove every chunk of `id`. Idempotent.
    ///
    /// While readers hold a lease on `id` the purge is deferred until the last
    /// one finishes; new readers are refused with `NotFound` in the meantime.
    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        ensure_id_safe(id)?;
        {
            let mut table = self.lock_leases();
            if table.readers.contains_key(id) {
                table.deferred.insert(id.to_string());
                debug!(object_id = %id, "purge deferred until active readers finish");
                return Ok(());
            }
            if !table.purging.insert(id.to_string()) {
                return Ok(());
            }
        }

        let result = self.purge(id).await;
        self.lock_leases().purging.remove(id);
        result
    }

    async fn purge(&self, id: &str) -> StorageResult<()> {
        let dir = self.object_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(object_id = %id, "removed chunk directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(object_id = %id, "chunk directory already missing");
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(parent) = dir.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Every object directory in the store with its last modification time.
    pub async fn list_objects(&self) -> StorageResult<Vec<(String, SystemTime)>> {
        let mut found = Vec::new();
        for shard_a in list_subdirs(&self.root).await? {
            for shard_b in list_subdirs(&shard_a).await? {
                for object_dir in list_subdirs(&shard_b).await? {
                    let Some(id) = object_dir.file_name().and_then(OsStr::to_str) else {
                        continue;
                    };
                    match fs::metadata(&object_dir).await {
                        Ok(meta) => found.push((id.to_string(), meta.modified()?)),
                        Err(err) if err.kind() == ErrorKind::NotFound => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }
        Ok(found)
    }

    /// Remove empty shard directories between `start` and the store root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    fn lock_leases(&self) -> MutexGuard<'_, LeaseTable> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, id: &str) -> StorageResult<ReadLease> {
        let mut table = self.lock_leases();
        if table.purging.contains(id) || table.deferred.contains(id) {
            return Err(StorageError::NotFound(id.to_string()));
        }
        *table.readers.entry(id.to_string()).or_insert(0) += 1;
        Ok(ReadLease {
            store: self.clone(),
            id: id.to_string(),
        })
    }

    fn release(&self, id: &str) {
        let purge_now = {
            let mut table = self.lock_leases();
            match table.readers.get_mut(id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    table.readers.remove(id);
                    let deferred = table.deferred.remove(id);
                    if deferred {
                        table.purging.insert(id.to_string());
                    }
                    deferred
                }
                None => false,
            }
        };
        if !purge_now {
            return;
        }

        let store = self.clone();
        let id = id.to_string();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.purge(&id).await {
                        warn!(object_id = %id, error = %err, "deferred chunk purge failed");
                    }
                    store.lock_leases().purging.remove(&id);
                });
            }
            Err(_) => {
                warn!(object_id = %id, "no runtime available for deferred chunk purge");
                store.lock_leases().purging.remove(&id);
            }
        }
    }
}

/// Keeps an object's chunks in place while a reader streams them.
struct ReadLease {
    store: ChunkStore,
    id: String,
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.store.release(&self.id);
    }
}

/// A chunk stream that holds its object's read lease until dropped.
struct LeasedStream {
    inner: ByteStream,
    _lease: ReadLease,
}

impl Stream for LeasedStream {
    type Item = StorageResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

fn ensure_id_safe(id: &str) -> StorageResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_OBJECT_ID_LEN
        && !id.starts_with('.')
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidObjectId(id.to_string()))
    }
}

fn chunk_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{:08}.{}", index, CHUNK_EXTENSION))
}

fn parse_chunk_index(name: &OsStr) -> Option<u64> {
    let name = name.to_str()?;
    let stem = name.strip_suffix(CHUNK_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn missing(id: &str, err: io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(id.to_string())
    } else {
        StorageError::Io(err)
    }
}

/// Write one chunk durably: temp file, fsync, rename into place.
async fn write_chunk(dir: &Path, index: u64, data: &[u8]) -> StorageResult<()> {
    let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
    let result = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, chunk_path(dir, index)).await
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StorageError::Io(err));
    }
    Ok(())
}

async fn open_segment(
    id: String,
    path: PathBuf,
    offset: u64,
    len: u64,
) -> StorageResult<impl Stream<Item = StorageResult<Bytes>> + Send> {
    let mut file = File::open(&path).await.map_err(|err| missing(&id, err))?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    Ok(ReaderStream::with_capacity(file.take(len), READ_BUFFER_SIZE).map_err(StorageError::from))
}

async fn list_subdirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn byte_stream(data: &[u8], piece: usize) -> stream::Iter<std::vec::IntoIter<io::Result<Bytes>>> {
        let pieces: Vec<io::Result<Bytes>> = data
            .chunks(piece.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(pieces)
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
        parts.concat()
    }

    #[tokio::test]
    async fn write_splits_into_fixed_size_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        let data = sample(10);

        let written = store.write("abc.bin", byte_stream(&data, 3)).await.unwrap();
        assert_eq!(written.size, 10);
        assert_eq!(written.chunks, 3);
        assert_eq!(written.md5, format!("{:x}", md5::compute(&data)));

        let object_dir = store.object_dir("abc.bin");
        assert_eq!(fs::metadata(chunk_path(&object_dir, 0)).await.unwrap().len(), 4);
        assert_eq!(fs::metadata(chunk_path(&object_dir, 2)).await.unwrap().len(), 2);
        assert_eq!(store.stored_size("abc.bin").await.unwrap(), 10);
        assert_eq!(collect(store.read_all("abc.bin", 10).await.unwrap()).await, data);
    }

    #[tokio::test]
    async fn every_range_matches_source_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        let data = sample(23);
        store.write("obj", byte_stream(&data, 5)).await.unwrap();

        for start in 0..data.len() as u64 {
            for end in start..data.len() as u64 {
                let got = collect(store.read_range("obj", start, end).await.unwrap()).await;
                assert_eq!(got, &data[start as usize..=end as usize], "range {start}-{end}");
            }
        }
    }

    #[tokio::test]
    async fn out_of_bounds_ranges_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        store.write("obj", byte_stream(&sample(8), 8)).await.unwrap();

        for (start, end) in [(5, 4), (8, 9), (3, 8)] {
            assert!(matches!(
                store.read_range("obj", start, end).await,
                Err(StorageError::InvalidRange(_))
            ));
        }
        assert!(matches!(
            store.read_range("missing", 0, 0).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bounds_are_checked_against_the_tail_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        let data = sample(10);
        store.write("obj", byte_stream(&data, 10)).await.unwrap();

        // last chunk holds bytes 8..=9 only
        assert!(matches!(
            store.read_range("obj", 9, 11).await,
            Err(StorageError::InvalidRange(_))
        ));
        assert!(matches!(
            store.read_all("obj", 12).await,
            Err(StorageError::InvalidRange(_))
        ));
        assert_eq!(collect(store.read_range("obj", 9, 9).await.unwrap()).await, &data[9..]);
        assert_eq!(collect(store.read_all("obj", 10).await.unwrap()).await, data);
        assert!(matches!(
            store.read_all("missing", 0).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_object_exists_without_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        let written = store.write("empty", byte_stream(&[], 1)).await.unwrap();

        assert_eq!(written.chunks, 0);
        assert!(store.contains("empty").await.unwrap());
        assert!(collect(store.read_all("empty", 0).await.unwrap()).await.is_empty());
        assert!(matches!(
            store.read_range("empty", 0, 0).await,
            Err(StorageError::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        let pieces: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"0123456789")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ];

        let err = store.write("broken", stream::iter(pieces)).await.unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(_)));
        assert!(!store.contains("broken").await.unwrap());
        assert!(store.list_objects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        store.write("obj", byte_stream(&sample(9), 2)).await.unwrap();

        store.delete("obj").await.unwrap();
        store.delete("obj").await.unwrap();
        assert!(matches!(store.read_all("obj", 9).await, Err(StorageError::NotFound(_))));
        assert!(list_subdirs(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_waits_for_active_reader() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        let data = sample(17);
        store.write("obj", byte_stream(&data, 17)).await.unwrap();

        let reader = store.read_all("obj", 17).await.unwrap();
        store.delete("obj").await.unwrap();
        assert!(store.contains("obj").await.unwrap());
        assert!(matches!(store.read_all("obj", 17).await, Err(StorageError::NotFound(_))));

        assert_eq!(collect(reader).await, data);
        for _ in 0..50 {
            if !store.contains("obj").await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!store.contains("obj").await.unwrap());
    }

    #[tokio::test]
    async fn reopening_with_other_chunk_size_fails() {
        let dir = tempfile::tempdir().unwrap();
        ChunkStore::open(dir.path(), 4).await.unwrap();
        ChunkStore::open(dir.path(), 4).await.unwrap();
        assert!(matches!(
            ChunkStore::open(dir.path(), 8).await,
            Err(StorageError::ChunkSizeMismatch { stored: 4, configured: 8 })
        ));
    }

    #[tokio::test]
    async fn unsafe_ids_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        for id in ["", "..", "../etc", "a/b", ".hidden"] {
            assert!(matches!(
                store.write(id, byte_stream(b"x", 1)).await,
                Err(StorageError::InvalidObjectId(_))
            ));
        }
    }

    #[tokio::test]
    async fn list_objects_reports_each_object_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 4).await.unwrap();
        store.write("one", byte_stream(b"1111", 4)).await.unwrap();
        store.write("two", byte_stream(b"22", 4)).await.unwrap();

        let mut ids: Vec<String> = store
            .list_objects()
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["one".to_string(), "two".to_string()]);
    }
}
