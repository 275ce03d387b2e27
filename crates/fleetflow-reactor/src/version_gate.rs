// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Version gate shared by the lifecycle consumers.
//!
//! Every derivation owns a watermark field on its document. A consumer:
//!
//! 1. reads the write version off the event (`version` of the inserted
//!    document, or `updatedFields.version` of an update),
//! 2. stamps the watermark, which only succeeds when the watermark is unset
//!    or `<= version - 1`,
//! 3. derives a patch from the stamped document,
//! 4. commits the patch, which only succeeds while the watermark is still
//!    `<=` the stamped value.
//!
//! Redelivered and out-of-order events fail step 2; a derivation overtaken by
//! a newer one fails step 4.

use async_trait::async_trait;
use fleetflow_core::model::{Load, LoadPatch, LoadWatermark, Truck, TruckPatch};
use fleetflow_core::{ChangeEvent, CommitOutcome, Document, EntityStore, Stamped, StoreError};
use tracing::debug;

use crate::error::Result;

/// A derivation guarded by one watermark field.
#[async_trait]
pub trait GatedDerivation: Send + Sync + 'static {
    /// Document carrying the watermark.
    type Doc: Document;
    /// Derived changes committed in one write.
    type Patch: Send + Sync;

    /// Watermark field name, for logs.
    fn watermark(&self) -> &'static str;

    /// Conditional read-and-stamp.
    async fn stamp(
        &self,
        store: &EntityStore,
        id: &str,
        observed: i64,
    ) -> std::result::Result<Option<Stamped<Self::Doc>>, StoreError>;

    /// Conditional commit.
    async fn commit(
        &self,
        store: &EntityStore,
        stamped: &Stamped<Self::Doc>,
        patch: &Self::Patch,
    ) -> std::result::Result<CommitOutcome<Self::Doc>, StoreError>;
}

/// Stop progression and route derivation (`stopsVer`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StopsDerivation;

/// Load status derivation (`statusVer`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusDerivation;

/// Truck availability instant derivation (`availabilityAtVer`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AvailabilityDerivation;

macro_rules! load_derivation {
    ($ty:ty, $watermark:expr) => {
        #[async_trait]
        impl GatedDerivation for $ty {
            type Doc = Load;
            type Patch = LoadPatch;

            fn watermark(&self) -> &'static str {
                $watermark.field()
            }

            async fn stamp(
                &self,
                store: &EntityStore,
                id: &str,
                observed: i64,
            ) -> std::result::Result<Option<Stamped<Load>>, StoreError> {
                store.stamp_load(id, $watermark, observed).await
            }

            async fn commit(
                &self,
                store: &EntityStore,
                stamped: &Stamped<Load>,
                patch: &LoadPatch,
            ) -> std::result::Result<CommitOutcome<Load>, StoreError> {
                store
                    .commit_load(&stamped.document.id, $watermark, stamped.stamp, patch)
                    .await
            }
        }
    };
}

load_derivation!(StopsDerivation, LoadWatermark::Stops);
load_derivation!(StatusDerivation, LoadWatermark::Status);

#[async_trait]
impl GatedDerivation for AvailabilityDerivation {
    type Doc = Truck;
    type Patch = TruckPatch;

    fn watermark(&self) -> &'static str {
        "availabilityAtVer"
    }

    async fn stamp(
        &self,
        store: &EntityStore,
        id: &str,
        observed: i64,
    ) -> std::result::Result<Option<Stamped<Truck>>, StoreError> {
        store.stamp_truck(id, observed).await
    }

    async fn commit(
        &self,
        store: &EntityStore,
        stamped: &Stamped<Truck>,
        patch: &TruckPatch,
    ) -> std::result::Result<CommitOutcome<Truck>, StoreError> {
        store
            .commit_truck(&stamped.document.id, stamped.stamp, patch)
            .await
    }
}

/// Applies the gate protocol for one derivation.
#[derive(Clone)]
pub struct VersionGate<X> {
    store: EntityStore,
    derivation: X,
}

impl<X: GatedDerivation> VersionGate<X> {
    /// Gate `derivation` on `store`.
    pub fn new(store: EntityStore, derivation: X) -> Self {
        Self { store, derivation }
    }

    /// Store the gate writes to.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Steps 1 and 2. `None` means the event must be skipped.
    pub async fn enter(&self, event: &ChangeEvent<X::Doc>) -> Result<Option<Stamped<X::Doc>>> {
        let Some(observed) = event.write_version() else {
            debug!(
                document_id = %event.document_id(),
                position = event.position(),
                "Skipping event: no version field"
            );
            return Ok(None);
        };

        let stamped = self
            .derivation
            .stamp(&self.store, event.document_id(), observed)
            .await?;

        match &stamped {
            Some(s) => debug!(
                document_id = %event.document_id(),
                watermark = self.derivation.watermark(),
                observed = observed,
                stamped = s.stamp.watermark,
                "Watermark stamped"
            ),
            None => debug!(
                document_id = %event.document_id(),
                watermark = self.derivation.watermark(),
                observed = observed,
                "Stale or repeated event; gate closed"
            ),
        }

        Ok(stamped)
    }

    /// Step 4.
    pub async fn commit(
        &self,
        stamped: &Stamped<X::Doc>,
        patch: &X::Patch,
    ) -> Result<CommitOutcome<X::Doc>> {
        let outcome = self.derivation.commit(&self.store, stamped, patch).await?;
        match &outcome {
            CommitOutcome::Applied(doc) => debug!(
                document_id = %doc.id(),
                watermark = self.derivation.watermark(),
                version = doc.version(),
                "Derived fields committed"
            ),
            CommitOutcome::Empty => debug!(
                document_id = %stamped.document.id(),
                watermark = self.derivation.watermark(),
                "Nothing to commit"
            ),
            CommitOutcome::Superseded => debug!(
                document_id = %stamped.document.id(),
                watermark = self.derivation.watermark(),
                "Commit superseded by a newer derivation"
            ),
        }
        Ok(outcome)
    }
}
