//! Represents one uploaded object and its published metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Routing tag derived from the content type at upload time.
///
/// Image objects are served whole; video objects are range-capable.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Video,
    Other,
}

impl ContentKind {
    /// Classify a MIME type by its top-level type, ignoring parameters.
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.starts_with("image/") {
            Self::Image
        } else if essence.starts_with("video/") {
            Self::Video
        } else {
            Self::Other
        }
    }
}

/// Metadata record of a stored object.
///
/// The record only becomes visible once every chunk of the object is durable;
/// the bytes themselves live in the chunk store under `id`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StoredObject {
    /// Generated storage identifier: 32 hex chars plus the upload's extension.
    pub id: String,

    /// Filename supplied by the client. Untrusted, display only.
    pub display_name: String,

    /// MIME type, declared by the client or guessed from the filename.
    pub content_type: String,

    pub kind: ContentKind,

    /// Total size in bytes.
    pub size_bytes: i64,

    /// Chunk size the object was written with.
    pub chunk_size: i64,

    /// Hex MD5 of the content, computed while streaming.
    pub md5: String,

    pub created_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn size(&self) -> u64 {
        self.size_bytes.max(0) as u64
    }
}
