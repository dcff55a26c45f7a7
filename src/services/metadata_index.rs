//! Metadata index: the `objects` table in SQLite.
//!
//! A row here is what makes an object exist. Rows are only inserted after the
//! chunk store has durably written every chunk, so readers never see an
//! object whose bytes are still in flight.

use crate::{
    models::object::StoredObject,
    services::error::{StorageError, StorageResult},
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct MetadataIndex {
    db: Arc<SqlitePool>,
}

impl MetadataIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open a pool for `database_url`, creating the database file if needed.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Publish a record. Fails with `Conflict` if the id is already taken.
    pub async fn insert(&self, record: &StoredObject) -> StorageResult<()> {
        let result = sqlx::query(
            "INSERT INTO objects (
                id, display_name, content_type, kind, size_bytes, chunk_size, md5, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.display_name)
        .bind(&record.content_type)
        .bind(record.kind)
        .bind(record.size_bytes)
        .bind(record.chunk_size)
        .bind(&record.md5)
        .bind(record.created_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Conflict(record.id.clone())),
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, display_name, content_type, kind, size_bytes, chunk_size, md5, created_at
             FROM objects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Most recently created record carrying `display_name`.
    pub async fn find_by_name(&self, display_name: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, display_name, content_type, kind, size_bytes, chunk_size, md5, created_at
             FROM objects WHERE display_name = ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(display_name)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::NotFound(display_name.to_string()))
    }

    /// All records, oldest first.
    pub async fn list_all(&self) -> StorageResult<Vec<StoredObject>> {
        Ok(sqlx::query_as::<_, StoredObject>(
            "SELECT id, display_name, content_type, kind, size_bytes, chunk_size, md5, created_at
             FROM objects ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&*self.db)
        .await?)
    }

    pub async fn contains(&self, id: &str) -> StorageResult<bool> {
        Ok(
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM objects WHERE id = ?)")
                .bind(id)
                .fetch_one(&*self.db)
                .await?,
        )
    }

    /// Remove the record for `id`. Idempotent; returns whether a row existed.
    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::ContentKind;
    use chrono::{Duration as ChronoDuration, Utc};

    async fn index() -> (tempfile::TempDir, MetadataIndex) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let index = MetadataIndex::connect(&url).await.unwrap();
        index.migrate().await.unwrap();
        (dir, index)
    }

    fn record(id: &str, name: &str) -> StoredObject {
        StoredObject {
            id: id.to_string(),
            display_name: name.to_string(),
            content_type: "video/mp4".to_string(),
            kind: ContentKind::Video,
            size_bytes: 42,
            chunk_size: 261120,
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let (_dir, index) = index().await;
        let rec = record("aa.mp4", "clip.mp4");
        index.insert(&rec).await.unwrap();

        let by_id = index.find_by_id("aa.mp4").await.unwrap();
        assert_eq!(by_id.display_name, "clip.mp4");
        assert_eq!(by_id.kind, ContentKind::Video);
        assert_eq!(by_id.size(), 42);

        let by_name = index.find_by_name("clip.mp4").await.unwrap();
        assert_eq!(by_name.id, "aa.mp4");
        assert!(index.contains("aa.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_id_is_a_conflict() {
        let (_dir, index) = index().await;
        index.insert(&record("dup", "a")).await.unwrap();
        assert!(matches!(
            index.insert(&record("dup", "b")).await,
            Err(StorageError::Conflict(id)) if id == "dup"
        ));
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let (_dir, index) = index().await;
        assert!(matches!(index.find_by_id("nope").await, Err(StorageError::NotFound(_))));
        assert!(matches!(index.find_by_name("nope").await, Err(StorageError::NotFound(_))));
        assert!(index.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_by_name_prefers_newest_upload() {
        let (_dir, index) = index().await;
        let mut older = record("old", "same.mp4");
        older.created_at = Utc::now() - ChronoDuration::minutes(5);
        index.insert(&older).await.unwrap();
        index.insert(&record("new", "same.mp4")).await.unwrap();

        assert_eq!(index.find_by_name("same.mp4").await.unwrap().id, "new");
        let ids: Vec<String> = index.list_all().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["old".to_string(), "new".to_string()]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, index) = index().await;
        index.insert(&record("gone", "x")).await.unwrap();

        assert!(index.delete("gone").await.unwrap());
        assert!(!index.delete("gone").await.unwrap());
        assert!(matches!(index.find_by_id("gone").await, Err(StorageError::NotFound(_))));
        assert!(matches!(index.find_by_name("x").await, Err(StorageError::NotFound(_))));
    }
}
