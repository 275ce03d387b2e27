// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetflow Core - Documents, Watermarks and the Change Feed
//!
//! This crate owns the data that the reactive layer in `fleetflow-reactor`
//! derives state for: loads (with their stops), trucks, drivers and
//! notification tasks. Every document carries a store-incremented write
//! `version`; every mutation appends a record to an ordered, per-collection
//! change feed that consumers pull from.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                  fleetflow-reactor (work queues)                     │
//! │   stops consumer · status consumer · truck consumer · delivery      │
//! └──────────────────────────────────────────────────────────────────────┘
//!          │ subscribe / next()                 │ stamp / commit
//!          ▼                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   EntityStore (this crate)                           │
//! │   typed documents · watermark gate · named queries · ChangeStream   │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌───────────────────────────┐        ┌────────────────────────────────┐
//! │     MemoryBackend         │   or   │   SqliteBackend (sqlx)         │
//! │  (tests, embedded use)    │        │  documents · change_feed ·     │
//! │                           │        │  feed_cursors                  │
//! └───────────────────────────┘        └────────────────────────────────┘
//! ```
//!
//! # Write Versions and Watermarks
//!
//! | Document | Watermarks | Derivation |
//! |----------|------------|------------|
//! | `loads` | `stopsVer`, `statusVer` | stop progression, load status |
//! | `trucks` | `availabilityAtVer` | absolute availability instant |
//!
//! A derivation may only run when `watermark <= observed version - 1`.
//! [`EntityStore::stamp_load`] and [`EntityStore::commit_load`] (and their
//! truck counterparts) implement both halves of that check as atomic
//! compare-and-swap writes.
//!
//! # Modules
//!
//! - [`backend`]: raw document storage and feed backends (memory, SQLite)
//! - [`change`]: change events, filters and field diffs
//! - [`document`]: the [`Document`] trait and collection names
//! - [`error`]: error types for store operations
//! - [`model`]: loads, stops, trucks, drivers, notification tasks
//! - [`store`]: the typed [`EntityStore`] and [`ChangeStream`]

#![warn(missing_docs)]

/// Raw document and change-feed backends.
pub mod backend;

/// Change events, subscriptions and field-level diffs.
pub mod change;

/// Document trait and collection identifiers.
pub mod document;

/// Error types for store operations.
pub mod error;

/// Domain model.
pub mod model;

/// Typed entity store and change streams.
pub mod store;

pub use change::{ChangeEvent, ChangeFilter, InsertMatch, Projection, Subscription};
pub use document::{Collection, Document};
pub use error::{Result, StoreError};
pub use store::{ChangeStream, CommitOutcome, EntityStore, Stamp, Stamped};
