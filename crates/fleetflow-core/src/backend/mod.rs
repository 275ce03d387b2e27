// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Raw document storage and change-feed backends.
//!
//! A backend stores JSON bodies keyed by collection and id, performs
//! compare-and-swap writes on the `version` column, and appends one feed record
//! per successful write in the same atomic step. Typed access, watermark
//! checks and diffing live in [`crate::store::EntityStore`] so every backend
//! gets identical semantics.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryBackend;
pub use self::sqlite::SqliteBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::change::Operation;
use crate::document::Collection;
use crate::error::StoreError;

/// A stored document body with its write version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Write version.
    pub version: i64,
    /// JSON body (includes `version`).
    pub body: Value,
}

/// A write produced by [`crate::store::EntityStore`] for a backend to persist.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    /// New write version.
    pub version: i64,
    /// Body after the write.
    pub after: Value,
    /// Body before the write.
    pub before: Value,
    /// Changed dotted paths with new values.
    pub updated_fields: Map<String, Value>,
    /// Removed dotted paths.
    pub removed_fields: Vec<String>,
}

/// A change-feed record as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    /// Monotonic position across the whole feed.
    pub position: i64,
    /// Collection of the changed document.
    pub collection: Collection,
    /// Mutation kind.
    pub operation: Operation,
    /// Changed document id.
    pub document_id: String,
    /// Changed paths (updates only).
    pub updated_fields: Map<String, Value>,
    /// Removed paths (updates only).
    pub removed_fields: Vec<String>,
    /// Body before the write (updates only).
    pub before: Option<Value>,
    /// Body after the write.
    pub after: Value,
}

/// Storage interface used by the entity store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetch one document.
    async fn fetch(&self, collection: Collection, id: &str)
    -> Result<Option<StoredDocument>, StoreError>;

    /// Fetch documents whose top-level string `field` equals `value`.
    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    /// Create a document at version `body.version` and record an insert.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the id is taken.
    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        version: i64,
        body: Value,
    ) -> Result<(), StoreError>;

    /// Replace a document if its version still equals `expected_version`, and
    /// record an update. Returns false when the version moved on.
    async fn compare_and_swap(
        &self,
        collection: Collection,
        id: &str,
        expected_version: i64,
        change: DocumentChange,
    ) -> Result<bool, StoreError>;

    /// Read feed records of `collection` strictly after `after_position`.
    async fn read_feed(
        &self,
        collection: Collection,
        after_position: i64,
        limit: i64,
    ) -> Result<Vec<FeedRecord>, StoreError>;

    /// Stored cursor of a subscription.
    async fn load_cursor(&self, subscription: &str) -> Result<Option<i64>, StoreError>;

    /// Persist the cursor of a subscription.
    async fn save_cursor(&self, subscription: &str, position: i64) -> Result<(), StoreError>;

    /// Notified after every feed append made through this backend instance.
    fn feed_signal(&self) -> Arc<Notify>;
}
