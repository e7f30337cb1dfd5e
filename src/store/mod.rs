//! Persistence boundary.
//!
//! Three logical tables: records, audit entries and the price cache. Record
//! financials and audit payloads cross this boundary only in sealed form; see
//! [`sealed`].

pub mod memory;
pub mod sealed;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
pub use sealed::{SealedAuditEntry, SealedRecord};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditTrailEntry;
use crate::nisab::Metal;
use crate::pricing::PriceCacheEntry;
use crate::record::NisabYearRecord;
use crate::types::NisabError;

/// One row change inside a [`RecordRepository::commit`].
#[derive(Debug, Clone, Copy)]
pub enum RecordWrite<'a> {
    Insert(&'a NisabYearRecord),
    /// Replaces the stored row, provided its version still equals `expected_version`.
    Update {
        record: &'a NisabYearRecord,
        expected_version: u64,
    },
    /// Removes a Draft row and all of its audit entries.
    DeleteDraft { record_id: Uuid, expected_version: u64 },
}

#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Applies every write and appends `audit` as one unit.
    ///
    /// A version mismatch fails with `ConcurrentModification`, a non-Draft delete
    /// with `DeleteForbidden`; either way nothing is written.
    async fn commit(&self, writes: &[RecordWrite<'_>], audit: &[AuditTrailEntry]) -> Result<(), NisabError>;

    async fn get(&self, record_id: Uuid) -> Result<Option<NisabYearRecord>, NisabError>;

    /// All records of a user, oldest Hawl first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<NisabYearRecord>, NisabError>;

    /// Stores a new record together with its first audit entries.
    async fn insert(&self, record: &NisabYearRecord, audit: &[AuditTrailEntry]) -> Result<(), NisabError> {
        self.commit(&[RecordWrite::Insert(record)], audit).await
    }

    /// Replaces one record and appends `audit`, under a version check.
    async fn update(
        &self,
        record: &NisabYearRecord,
        expected_version: u64,
        audit: &[AuditTrailEntry],
    ) -> Result<(), NisabError> {
        self.commit(&[RecordWrite::Update { record, expected_version }], audit).await
    }

    async fn delete_draft(&self, record_id: Uuid, expected_version: u64) -> Result<(), NisabError> {
        self.commit(&[RecordWrite::DeleteDraft { record_id, expected_version }], &[]).await
    }
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &AuditTrailEntry) -> Result<(), NisabError>;

    /// Entries of one record in append order.
    async fn list_for(&self, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, NisabError>;

    async fn latest_timestamp(&self, record_id: Uuid) -> Result<Option<DateTime<Utc>>, NisabError>;
}

#[async_trait]
pub trait PriceCacheRepository: Send + Sync {
    /// Makes `entry` the authoritative cache row for its metal.
    async fn record_price(&self, entry: &PriceCacheEntry) -> Result<(), NisabError>;

    async fn latest_price(&self, metal: Metal) -> Result<Option<PriceCacheEntry>, NisabError>;
}

/// Convenience bound for a store backing every table.
pub trait TrackerStore: RecordRepository + AuditRepository + PriceCacheRepository {}

impl<T> TrackerStore for T where T: RecordRepository + AuditRepository + PriceCacheRepository {}
