//! In-process store. Holds sealed rows only, like any other backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::sealed::{SealedAuditEntry, SealedRecord};
use super::{AuditRepository, PriceCacheRepository, RecordRepository, RecordWrite};
use crate::audit::AuditTrailEntry;
use crate::crypto::{AesGcmCipher, FieldCipher};
use crate::nisab::Metal;
use crate::pricing::PriceCacheEntry;
use crate::record::{NisabYearRecord, RecordStatus};
use crate::types::NisabError;

#[derive(Default)]
struct Tables {
    records: HashMap<Uuid, SealedRecord>,
    audit: HashMap<Uuid, Vec<SealedAuditEntry>>,
    prices: HashMap<Metal, PriceCacheEntry>,
}

pub struct MemoryStore {
    cipher: Arc<dyn FieldCipher>,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(cipher: Arc<dyn FieldCipher>) -> Self {
        Self {
            cipher,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// A store sealing with a throwaway random key.
    pub fn ephemeral() -> Self {
        Self::new(Arc::new(AesGcmCipher::ephemeral()))
    }

    /// Raw sealed rows of a record, as they sit at rest.
    pub fn sealed_record(&self, record_id: Uuid) -> Option<SealedRecord> {
        self.tables.read().ok()?.records.get(&record_id).cloned()
    }

    pub fn sealed_audit(&self, record_id: Uuid) -> Vec<SealedAuditEntry> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.audit.get(&record_id).cloned())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, NisabError> {
        self.tables.read().map_err(|_| NisabError::storage("memory store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, NisabError> {
        self.tables.write().map_err(|_| NisabError::storage("memory store lock poisoned"))
    }

    fn seal_entries(&self, audit: &[AuditTrailEntry]) -> Result<Vec<SealedAuditEntry>, NisabError> {
        audit
            .iter()
            .map(|e| SealedAuditEntry::seal(e, self.cipher.as_ref()))
            .collect()
    }
}

fn check_version(stored: &SealedRecord, expected_version: u64) -> Result<(), NisabError> {
    if stored.version != expected_version {
        return Err(NisabError::ConcurrentModification {
            record_id: stored.id,
            expected_version,
            actual_version: stored.version,
        });
    }
    Ok(())
}

#[async_trait]
impl RecordRepository for MemoryStore {
    async fn commit(&self, writes: &[RecordWrite<'_>], audit: &[AuditTrailEntry]) -> Result<(), NisabError> {
        let mut sealed = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                RecordWrite::Insert(record) | RecordWrite::Update { record, .. } => {
                    sealed.push(Some(SealedRecord::seal(record, self.cipher.as_ref())?));
                }
                RecordWrite::DeleteDraft { .. } => sealed.push(None),
            }
        }
        let entries = self.seal_entries(audit)?;

        let mut tables = self.write()?;

        // Validate the whole batch before touching any table.
        for write in writes {
            match *write {
                RecordWrite::Insert(record) => {
                    if tables.records.contains_key(&record.id) {
                        return Err(NisabError::storage(format!("record {} already exists", record.id)));
                    }
                }
                RecordWrite::Update { record, expected_version } => {
                    let stored = tables
                        .records
                        .get(&record.id)
                        .ok_or(NisabError::RecordNotFound { record_id: record.id })?;
                    check_version(stored, expected_version)?;
                }
                RecordWrite::DeleteDraft { record_id, expected_version } => {
                    let stored = tables
                        .records
                        .get(&record_id)
                        .ok_or(NisabError::RecordNotFound { record_id })?;
                    check_version(stored, expected_version)?;
                    if stored.status != RecordStatus::Draft {
                        return Err(NisabError::DeleteForbidden { record_id, status: stored.status });
                    }
                }
            }
        }
        if let Some(orphan) = entries
            .iter()
            .find(|e| !exists_after(&tables, writes, e.record_id))
        {
            return Err(NisabError::RecordNotFound { record_id: orphan.record_id });
        }

        for (write, row) in writes.iter().zip(sealed) {
            match (*write, row) {
                (RecordWrite::DeleteDraft { record_id, .. }, _) => {
                    tables.records.remove(&record_id);
                    tables.audit.remove(&record_id);
                }
                (RecordWrite::Insert(record) | RecordWrite::Update { record, .. }, Some(row)) => {
                    tables.records.insert(record.id, row);
                }
                (_, None) => {}
            }
        }
        for entry in entries {
            tables.audit.entry(entry.record_id).or_default().push(entry);
        }
        Ok(())
    }

    async fn get(&self, record_id: Uuid) -> Result<Option<NisabYearRecord>, NisabError> {
        let sealed = self.read()?.records.get(&record_id).cloned();
        sealed.map(|s| s.open(self.cipher.as_ref())).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<NisabYearRecord>, NisabError> {
        let mut rows: Vec<SealedRecord> = self
            .read()?
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.hawl_start_date, r.created_at, r.id));
        rows.iter().map(|r| r.open(self.cipher.as_ref())).collect()
    }
}

/// Whether `record_id` still exists once `writes` are applied.
fn exists_after(tables: &Tables, writes: &[RecordWrite<'_>], record_id: Uuid) -> bool {
    let mut exists = tables.records.contains_key(&record_id);
    for write in writes {
        match *write {
            RecordWrite::Insert(r) if r.id == record_id => exists = true,
            RecordWrite::DeleteDraft { record_id: id, .. } if id == record_id => exists = false,
            _ => {}
        }
    }
    exists
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append(&self, entry: &AuditTrailEntry) -> Result<(), NisabError> {
        let sealed = SealedAuditEntry::seal(entry, self.cipher.as_ref())?;
        let mut tables = self.write()?;
        if !tables.records.contains_key(&entry.record_id) {
            return Err(NisabError::RecordNotFound { record_id: entry.record_id });
        }
        tables.audit.entry(entry.record_id).or_default().push(sealed);
        Ok(())
    }

    async fn list_for(&self, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, NisabError> {
        let rows = self.read()?.audit.get(&record_id).cloned().unwrap_or_default();
        rows.iter().map(|r| r.open(self.cipher.as_ref())).collect()
    }

    async fn latest_timestamp(&self, record_id: Uuid) -> Result<Option<DateTime<Utc>>, NisabError> {
        Ok(self
            .read()?
            .audit
            .get(&record_id)
            .and_then(|rows| rows.iter().map(|r| r.timestamp).max()))
    }
}

#[async_trait]
impl PriceCacheRepository for MemoryStore {
    async fn record_price(&self, entry: &PriceCacheEntry) -> Result<(), NisabError> {
        self.write()?.prices.insert(entry.metal, entry.clone());
        Ok(())
    }

    async fn latest_price(&self, metal: Metal) -> Result<Option<PriceCacheEntry>, NisabError> {
        Ok(self.read()?.prices.get(&metal).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AssetBreakdown;
    use crate::audit::{AuditPayload, AuditTrail};
    use crate::calendar::HawlPeriod;
    use crate::clock::ManualClock;
    use crate::methodology::Methodology;
    use crate::record::NewRecord;
    use crate::types::Actor;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn record() -> NisabYearRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        NisabYearRecord::new_draft(
            NewRecord {
                user_id: Uuid::new_v4(),
                period: HawlPeriod::starting_at(start).unwrap(),
                methodology: Methodology::Standard,
                nisab_threshold: dec!(5000),
                total_wealth: dec!(6000),
                liabilities: dec!(0),
                asset_breakdown: AssetBreakdown::default(),
                user_notes: None,
                is_primary: true,
            },
            start,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let store = MemoryStore::ephemeral();
        let mut r = record();
        store.insert(&r, &[]).await.unwrap();

        r.version = 1;
        store.update(&r, 0, &[]).await.unwrap();

        r.total_wealth = dec!(1);
        let err = store.update(&r, 0, &[]).await.unwrap_err();
        assert_eq!(
            err,
            NisabError::ConcurrentModification { record_id: r.id, expected_version: 0, actual_version: 1 }
        );
        assert_eq!(store.get(r.id).await.unwrap().unwrap().total_wealth, dec!(6000));
    }

    #[tokio::test]
    async fn test_delete_cascades_audit() {
        let store = MemoryStore::ephemeral();
        let r = record();
        let created = AuditTrailEntry::stamp(
            r.id,
            Actor::System,
            AuditPayload::Unlocked { reason: "placeholder reason".to_string() },
            r.created_at,
            None,
        );
        store.insert(&r, &[created]).await.unwrap();
        assert_eq!(store.list_for(r.id).await.unwrap().len(), 1);

        store.delete_draft(r.id, 0).await.unwrap();
        assert!(store.get(r.id).await.unwrap().is_none());
        assert!(store.list_for(r.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = MemoryStore::ephemeral();
        let mut kept = record();
        store.insert(&kept, &[]).await.unwrap();
        let fresh = record();

        kept.version = 1;
        let writes = [
            RecordWrite::Insert(&fresh),
            RecordWrite::Update { record: &kept, expected_version: 7 },
        ];
        let err = store.commit(&writes, &[]).await.unwrap_err();
        assert_eq!(err.code(), "CONCURRENT_MODIFICATION");
        assert!(store.get(fresh.id).await.unwrap().is_none());
        assert_eq!(store.get(kept.id).await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_audit_trail_append_orders_and_clamps() {
        let store = Arc::new(MemoryStore::ephemeral());
        let r = record();
        store.insert(&r, &[]).await.unwrap();
        let clock = Arc::new(ManualClock::new(r.created_at + chrono::Duration::hours(2)));
        let trail = AuditTrail::new(store.clone(), clock.clone());

        let first = trail
            .append(r.id, Actor::System, AuditPayload::Unlocked { reason: "first correction".to_string() })
            .await
            .unwrap();
        clock.set(r.created_at);
        let second = trail
            .append(r.id, Actor::User(r.user_id), AuditPayload::Unlocked { reason: "second correction".to_string() })
            .await
            .unwrap();

        assert_eq!(second.timestamp, first.timestamp);
        assert_eq!(trail.list_for(r.id).await.unwrap(), vec![first.clone(), second.clone()]);
        assert_eq!(store.latest_timestamp(r.id).await.unwrap(), Some(first.timestamp));

        let err = trail
            .append(Uuid::new_v4(), Actor::System, AuditPayload::Unlocked { reason: "no such record".to_string() })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RECORD_NOT_FOUND");
        assert_eq!(trail.list_for(r.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rows_at_rest_are_sealed() {
        let store = MemoryStore::ephemeral();
        let r = record();
        store.insert(&r, &[]).await.unwrap();
        let sealed = store.sealed_record(r.id).unwrap();
        assert!(sealed.financials.starts_with("v1:"));
        assert!(!sealed.financials.contains("6000"));
    }
}
