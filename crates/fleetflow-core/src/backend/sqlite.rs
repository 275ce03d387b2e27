// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed document store and change feed.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::Notify;
use tracing::debug;

use super::{Backend, DocumentChange, FeedRecord, StoredDocument};
use crate::change::Operation;
use crate::document::Collection;
use crate::error::StoreError;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    version: i64,
    body: String,
}

impl DocumentRow {
    fn into_stored(self) -> Result<StoredDocument, StoreError> {
        Ok(StoredDocument {
            version: self.version,
            body: serde_json::from_str(&self.body)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FeedRow {
    position: i64,
    collection: String,
    operation: String,
    document_id: String,
    updated_fields: String,
    removed_fields: String,
    before_body: Option<String>,
    after_body: String,
}

impl FeedRow {
    fn into_record(self) -> Result<FeedRecord, StoreError> {
        let position = self.position;
        let invalid = |reason: String| StoreError::InvalidFeedRecord { position, reason };
        let collection = Collection::from_name(&self.collection)
            .ok_or_else(|| invalid(format!("unknown collection '{}'", self.collection)))?;
        let operation = Operation::from_name(&self.operation)
            .ok_or_else(|| invalid(format!("unknown operation '{}'", self.operation)))?;

        Ok(FeedRecord {
            position: self.position,
            collection,
            operation,
            document_id: self.document_id,
            updated_fields: serde_json::from_str(&self.updated_fields)?,
            removed_fields: serde_json::from_str(&self.removed_fields)?,
            before: self
                .before_body
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            after: serde_json::from_str(&self.after_body)?,
        })
    }
}

/// SQLite-backed backend.
///
/// Each write updates `documents` and appends to `change_feed` in one
/// transaction. Cursors live in `feed_cursors`, so subscriptions resume after a
/// restart.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    signal: Arc<Notify>,
}

impl SqliteBackend {
    /// Create a backend from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            signal: Arc::new(Notify::new()),
        }
    }

    /// Open (creating if needed) the database file at `path` and run
    /// migrations.
    ///
    /// ```ignore
    /// let backend = SqliteBackend::from_path(".data/fleetflow.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        MIGRATOR.run(&pool).await?;
        debug!(path = %path.display(), "SQLite store ready");

        Ok(Self::new(pool))
    }

    /// Open a private in-memory database with migrations applied.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn fetch(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT version, body
            FROM documents
            WHERE collection = ? AND document_id = ?
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_stored).transpose()
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT version, body
            FROM documents
            WHERE collection = ? AND json_extract(body, '$.' || ?) = ?
            ORDER BY document_id
            "#,
        )
        .bind(collection.as_str())
        .bind(field)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DocumentRow::into_stored).collect()
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        version: i64,
        body: Value,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(&body)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, document_id, version, body, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (collection, document_id) DO NOTHING
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(version)
        .bind(&body)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                collection,
                id: id.to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO change_feed (collection, operation, document_id, after_body, created_at)
            VALUES (?, 'insert', ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(&body)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.signal.notify_waiters();
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        collection: Collection,
        id: &str,
        expected_version: i64,
        change: DocumentChange,
    ) -> Result<bool, StoreError> {
        let after = serde_json::to_string(&change.after)?;
        let before = serde_json::to_string(&change.before)?;
        let updated_fields = serde_json::to_string(&change.updated_fields)?;
        let removed_fields = serde_json::to_string(&change.removed_fields)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET version = ?, body = ?, updated_at = CURRENT_TIMESTAMP
            WHERE collection = ? AND document_id = ? AND version = ?
            "#,
        )
        .bind(change.version)
        .bind(&after)
        .bind(collection.as_str())
        .bind(id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO change_feed
                (collection, operation, document_id, updated_fields, removed_fields,
                 before_body, after_body, created_at)
            VALUES (?, 'update', ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(&updated_fields)
        .bind(&removed_fields)
        .bind(&before)
        .bind(&after)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.signal.notify_waiters();
        Ok(true)
    }

    async fn read_feed(
        &self,
        collection: Collection,
        after_position: i64,
        limit: i64,
    ) -> Result<Vec<FeedRecord>, StoreError> {
        let rows = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT position, collection, operation, document_id, updated_fields,
                   removed_fields, before_body, after_body
            FROM change_feed
            WHERE collection = ? AND position > ?
            ORDER BY position ASC
            LIMIT ?
            "#,
        )
        .bind(collection.as_str())
        .bind(after_position)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FeedRow::into_record).collect()
    }

    async fn load_cursor(&self, subscription: &str) -> Result<Option<i64>, StoreError> {
        let position: Option<i64> =
            sqlx::query_scalar("SELECT position FROM feed_cursors WHERE subscription = ?")
                .bind(subscription)
                .fetch_optional(&self.pool)
                .await?;
        Ok(position)
    }

    async fn save_cursor(&self, subscription: &str, position: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO feed_cursors (subscription, position, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (subscription) DO UPDATE
            SET position = excluded.position, updated_at = excluded.updated_at
            "#,
        )
        .bind(subscription)
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn feed_signal(&self) -> Arc<Notify> {
        self.signal.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend
            .insert(Collection::Trucks, "T1", 1, json!({"id": "T1", "version": 1}))
            .await
            .unwrap();

        let doc = backend.fetch(Collection::Trucks, "T1").await.unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.body["id"], "T1");
        assert!(backend.fetch(Collection::Loads, "T1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected_without_feed_record() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let body = json!({"id": "T1", "version": 1});
        backend
            .insert(Collection::Trucks, "T1", 1, body.clone())
            .await
            .unwrap();

        let err = backend
            .insert(Collection::Trucks, "T1", 1, body)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let feed = backend.read_feed(Collection::Trucks, 0, 10).await.unwrap();
        assert_eq!(feed.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_version() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let before = json!({"id": "T1", "version": 1, "status": "Available"});
        backend
            .insert(Collection::Trucks, "T1", 1, before.clone())
            .await
            .unwrap();

        let after = json!({"id": "T1", "version": 2, "status": "On route"});
        let (updated_fields, removed_fields) = crate::change::diff_fields(&before, &after);
        let change = DocumentChange {
            version: 2,
            after,
            before,
            updated_fields,
            removed_fields,
        };

        assert!(
            !backend
                .compare_and_swap(Collection::Trucks, "T1", 7, change.clone())
                .await
                .unwrap()
        );
        assert!(
            backend
                .compare_and_swap(Collection::Trucks, "T1", 1, change)
                .await
                .unwrap()
        );

        let feed = backend.read_feed(Collection::Trucks, 0, 10).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[1].operation, Operation::Update);
        assert_eq!(feed[1].updated_fields["status"], "On route");
        assert_eq!(feed[1].before.as_ref().unwrap()["status"], "Available");
    }

    #[tokio::test]
    async fn test_find_by_field_uses_json_body() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend
            .insert(Collection::Loads, "L2", 1, json!({"id": "L2", "truck": "T1"}))
            .await
            .unwrap();
        backend
            .insert(Collection::Loads, "L1", 1, json!({"id": "L1", "truck": "T1"}))
            .await
            .unwrap();
        backend
            .insert(Collection::Loads, "L3", 1, json!({"id": "L3", "truck": null}))
            .await
            .unwrap();

        let found = backend
            .find_by_field(Collection::Loads, "truck", "T1")
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|d| d.body["id"].clone()).collect();
        assert_eq!(ids, vec![json!("L1"), json!("L2")]);
    }

    #[tokio::test]
    async fn test_cursor_upsert() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        assert_eq!(backend.load_cursor("stops").await.unwrap(), None);
        backend.save_cursor("stops", 3).await.unwrap();
        backend.save_cursor("stops", 9).await.unwrap();
        assert_eq!(backend.load_cursor("stops").await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_from_path_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fleetflow.db");

        {
            let backend = SqliteBackend::from_path(&path).await.unwrap();
            backend
                .insert(Collection::Drivers, "D1", 1, json!({"id": "D1"}))
                .await
                .unwrap();
            backend.save_cursor("tasks", 1).await.unwrap();
        }

        let backend = SqliteBackend::from_path(&path).await.unwrap();
        assert!(backend.fetch(Collection::Drivers, "D1").await.unwrap().is_some());
        assert_eq!(backend.load_cursor("tasks").await.unwrap(), Some(1));
    }
}
