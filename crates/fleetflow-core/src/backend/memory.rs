// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory backend.
//!
//! Holds documents, the feed and cursors behind one lock, so every write and
//! its feed record are atomic. Used by tests and by embedders that do not need
//! durability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Notify};

use super::{Backend, DocumentChange, FeedRecord, StoredDocument};
use crate::change::Operation;
use crate::document::Collection;
use crate::error::StoreError;

#[derive(Default)]
struct MemoryState {
    documents: HashMap<(Collection, String), StoredDocument>,
    feed: Vec<FeedRecord>,
    cursors: HashMap<String, i64>,
}

/// In-memory backend.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    signal: Arc<Notify>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of feed records appended so far.
    pub async fn feed_len(&self) -> usize {
        self.state.lock().await.feed.len()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.documents.get(&(collection, id.to_string())).cloned())
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let state = self.state.lock().await;
        let mut found: Vec<(&String, &StoredDocument)> = state
            .documents
            .iter()
            .filter(|((c, _), doc)| {
                *c == collection && doc.body.get(field).and_then(Value::as_str) == Some(value)
            })
            .map(|((_, id), doc)| (id, doc))
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0));
        Ok(found.into_iter().map(|(_, doc)| doc.clone()).collect())
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        version: i64,
        body: Value,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let key = (collection, id.to_string());
        if state.documents.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                collection,
                id: id.to_string(),
            });
        }

        let position = state.feed.len() as i64 + 1;
        state.feed.push(FeedRecord {
            position,
            collection,
            operation: Operation::Insert,
            document_id: id.to_string(),
            updated_fields: Map::new(),
            removed_fields: Vec::new(),
            before: None,
            after: body.clone(),
        });
        state.documents.insert(key, StoredDocument { version, body });
        drop(state);

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
        let mut state = self.state.lock().await;
        let key = (collection, id.to_string());
        match state.documents.get(&key) {
            Some(doc) if doc.version == expected_version => {}
            _ => return Ok(false),
        }

        let position = state.feed.len() as i64 + 1;
        state.feed.push(FeedRecord {
            position,
            collection,
            operation: Operation::Update,
            document_id: id.to_string(),
            updated_fields: change.updated_fields,
            removed_fields: change.removed_fields,
            before: Some(change.before),
            after: change.after.clone(),
        });
        state.documents.insert(
            key,
            StoredDocument {
                version: change.version,
                body: change.after,
            },
        );
        drop(state);

        self.signal.notify_waiters();
        Ok(true)
    }

    async fn read_feed(
        &self,
        collection: Collection,
        after_position: i64,
        limit: i64,
    ) -> Result<Vec<FeedRecord>, StoreError> {
        let state = self.state.lock().await;
        let start = usize::try_from(after_position.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .feed
            .iter()
            .skip(start)
            .filter(|r| r.collection == collection)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn load_cursor(&self, subscription: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.state.lock().await.cursors.get(subscription).copied())
    }

    async fn save_cursor(&self, subscription: &str, position: i64) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .cursors
            .insert(subscription.to_string(), position);
        Ok(())
    }

    fn feed_signal(&self) -> Arc<Notify> {
        self.signal.clone()
    }
}
