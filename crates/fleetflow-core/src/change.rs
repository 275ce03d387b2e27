// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Change events and subscriptions.
//!
//! Every successful write appends one feed record carrying the operation, the
//! document id, the dotted paths that changed (with their new values) and the
//! full document before and after the write. Subscribers select records with a
//! [`ChangeFilter`] and choose which full documents they want with a
//! [`Projection`].

use std::fmt;

use serde_json::{Map, Value};

use crate::document::{Collection, Document, VERSION_FIELD};

/// Kind of mutation a feed record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Document created.
    Insert,
    /// Document modified.
    Update,
}

impl Operation {
    /// Storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }

    /// Parse a storage name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<D> {
    /// Document created.
    Insert {
        /// Feed position.
        position: i64,
        /// Created document id.
        document_id: String,
        /// Document as inserted.
        full_document: D,
    },
    /// Document modified.
    Update {
        /// Feed position.
        position: i64,
        /// Modified document id.
        document_id: String,
        /// Changed dotted paths and their new values.
        updated_fields: Map<String, Value>,
        /// Dotted paths that no longer exist.
        removed_fields: Vec<String>,
        /// Document before the write, when projected.
        full_document_before: Option<D>,
        /// Document after the write, when projected.
        full_document_after: Option<D>,
    },
}

impl<D> ChangeEvent<D> {
    /// Feed position of the event.
    pub fn position(&self) -> i64 {
        match self {
            Self::Insert { position, .. } | Self::Update { position, .. } => *position,
        }
    }

    /// Id of the changed document.
    pub fn document_id(&self) -> &str {
        match self {
            Self::Insert { document_id, .. } | Self::Update { document_id, .. } => document_id,
        }
    }

    /// Operation kind.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Insert { .. } => Operation::Insert,
            Self::Update { .. } => Operation::Update,
        }
    }

    /// Document before the change. Always `None` for inserts.
    pub fn before(&self) -> Option<&D> {
        match self {
            Self::Insert { .. } => None,
            Self::Update {
                full_document_before,
                ..
            } => full_document_before.as_ref(),
        }
    }

    /// Document after the change, when available.
    pub fn after(&self) -> Option<&D> {
        match self {
            Self::Insert { full_document, .. } => Some(full_document),
            Self::Update {
                full_document_after,
                ..
            } => full_document_after.as_ref(),
        }
    }

    /// Whether an update touched `path` or anything below it.
    /// Inserts touch every path.
    pub fn touches(&self, path: &str) -> bool {
        match self {
            Self::Insert { .. } => true,
            Self::Update {
                updated_fields,
                removed_fields,
                ..
            } => updated_fields
                .keys()
                .chain(removed_fields.iter())
                .any(|changed| path_overlaps(path, changed)),
        }
    }
}

impl<D: Document> ChangeEvent<D> {
    /// Write version produced by the mutation.
    ///
    /// Inserts carry it in the full document, updates in the updated fields.
    pub fn write_version(&self) -> Option<i64> {
        match self {
            Self::Insert { full_document, .. } => Some(full_document.version()),
            Self::Update { updated_fields, .. } => {
                updated_fields.get(VERSION_FIELD).and_then(Value::as_i64)
            }
        }
    }
}

/// How inserts are matched by a [`ChangeFilter`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertMatch {
    /// Inserts never match.
    Never,
    /// Every insert matches.
    Always,
    /// Inserts match when the named top-level field is present and not null.
    WhenSet(&'static str),
}

/// Selects feed records for a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    /// Insert rule.
    pub on_insert: InsertMatch,
    /// Updates match when any changed path equals or lies below one of these.
    pub update_paths: Vec<&'static str>,
}

impl ChangeFilter {
    /// Match every insert and the given update paths.
    pub fn inserts_and(update_paths: &[&'static str]) -> Self {
        Self {
            on_insert: InsertMatch::Always,
            update_paths: update_paths.to_vec(),
        }
    }

    /// Whether an inserted document matches.
    pub fn matches_insert(&self, document: &Value) -> bool {
        match &self.on_insert {
            InsertMatch::Never => false,
            InsertMatch::Always => true,
            InsertMatch::WhenSet(field) => document.get(*field).is_some_and(|v| !v.is_null()),
        }
    }

    /// Whether an update with the given changed paths matches.
    pub fn matches_update(&self, updated_fields: &Map<String, Value>, removed: &[String]) -> bool {
        updated_fields
            .keys()
            .chain(removed.iter())
            .any(|changed| self.update_paths.iter().any(|w| path_overlaps(w, changed)))
    }
}

/// Which full documents a subscription receives with updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    /// Include the document before the change.
    pub before: bool,
    /// Include the document after the change.
    pub after: bool,
}

impl Projection {
    /// Before and after documents.
    pub const FULL: Projection = Projection {
        before: true,
        after: true,
    };
}

impl Default for Projection {
    fn default() -> Self {
        Self::FULL
    }
}

/// A named, resumable change-feed subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Resume key. The feed cursor is stored under this name.
    pub name: String,
    /// Collection to follow.
    pub collection: Collection,
    /// Record selection.
    pub filter: ChangeFilter,
    /// Full-document projection.
    pub projection: Projection,
}

impl Subscription {
    /// Create a subscription with the full projection.
    pub fn new(name: impl Into<String>, collection: Collection, filter: ChangeFilter) -> Self {
        Self {
            name: name.into(),
            collection,
            filter,
            projection: Projection::FULL,
        }
    }

    /// Override the projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}

/// `watched` and `changed` refer to the same subtree when one is a dotted
/// prefix of the other.
fn path_overlaps(watched: &str, changed: &str) -> bool {
    is_prefix_path(watched, changed) || is_prefix_path(changed, watched)
}

fn is_prefix_path(prefix: &str, path: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.')
}

/// Compute changed and removed dotted paths between two JSON documents.
///
/// Objects are compared key by key and arrays of equal length index by
/// index (`stops.1.status`). Anything else that differs is reported at its
/// own path with its new value.
pub fn diff_fields(before: &Value, after: &Value) -> (Map<String, Value>, Vec<String>) {
    let mut updated = Map::new();
    let mut removed = Vec::new();
    diff_into(None, before, after, &mut updated, &mut removed);
    (updated, removed)
}

fn diff_into(
    path: Option<&str>,
    before: &Value,
    after: &Value,
    updated: &mut Map<String, Value>,
    removed: &mut Vec<String>,
) {
    let join = |key: &str| match path {
        Some(p) => format!("{p}.{key}"),
        None => key.to_string(),
    };

    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (key, new_value) in a {
                match b.get(key) {
                    Some(old_value) => {
                        diff_into(Some(&join(key)), old_value, new_value, updated, removed)
                    }
                    None => {
                        updated.insert(join(key), new_value.clone());
                    }
                }
            }
            for key in b.keys().filter(|k| !a.contains_key(*k)) {
                removed.push(join(key));
            }
        }
        (Value::Array(b), Value::Array(a)) if b.len() == a.len() && path.is_some() => {
            for (index, (old_value, new_value)) in b.iter().zip(a).enumerate() {
                diff_into(
                    Some(&join(&index.to_string())),
                    old_value,
                    new_value,
                    updated,
                    removed,
                );
            }
        }
        _ if before != after => {
            if let Some(p) = path {
                updated.insert(p.to_string(), after.clone());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_reports_nested_array_paths() {
        let before = json!({
            "version": 3,
            "stops": [{"id": "a", "status": "New"}, {"id": "b", "status": "New"}],
            "truck": null
        });
        let after = json!({
            "version": 4,
            "stops": [{"id": "a", "status": "On route to PU"}, {"id": "b", "status": "New"}],
            "truck": null
        });

        let (updated, removed) = diff_fields(&before, &after);
        assert_eq!(updated.len(), 2);
        assert_eq!(updated["version"], json!(4));
        assert_eq!(updated["stops.0.status"], json!("On route to PU"));
        assert!(removed.is_empty());
    }

    #[test]
    fn test_diff_replaces_resized_arrays_whole() {
        let before = json!({"stops": [1, 2]});
        let after = json!({"stops": [1, 2, 3]});
        let (updated, _) = diff_fields(&before, &after);
        assert_eq!(updated["stops"], json!([1, 2, 3]));
    }

    #[test]
    fn test_diff_reports_removed_keys() {
        let before = json!({"a": 1, "b": 2});
        let after = json!({"a": 1});
        let (updated, removed) = diff_fields(&before, &after);
        assert!(updated.is_empty());
        assert_eq!(removed, vec!["b".to_string()]);
    }

    #[test]
    fn test_filter_matches_prefixes_not_siblings() {
        let filter = ChangeFilter::inserts_and(&["stops", "startTruckLocation"]);
        let mut fields = Map::new();
        fields.insert("stops.1.status".into(), json!("GTG"));
        assert!(filter.matches_update(&fields, &[]));

        let mut fields = Map::new();
        fields.insert("stopsVer".into(), json!(7));
        fields.insert("stopsStart".into(), json!(null));
        assert!(!filter.matches_update(&fields, &[]));

        let mut fields = Map::new();
        fields.insert("startTruckLocation.lat".into(), json!(1.0));
        assert!(filter.matches_update(&fields, &[]));
    }

    #[test]
    fn test_insert_match_when_set() {
        let filter = ChangeFilter {
            on_insert: InsertMatch::WhenSet("truck"),
            update_paths: vec!["status", "truck"],
        };
        assert!(filter.matches_insert(&json!({"truck": "T1"})));
        assert!(!filter.matches_insert(&json!({"truck": null})));
        assert!(!filter.matches_insert(&json!({})));
    }
}
