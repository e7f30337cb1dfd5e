//! Row codec between domain values and their at-rest form.
//!
//! Identity, period and lifecycle columns stay in the clear so stores can index
//! and filter on them. Financial figures, the methodology, the asset breakdown,
//! notes and every audit payload are sealed with the injected [`FieldCipher`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::AssetBreakdown;
use crate::audit::{AuditEnvelope, AuditEventType, AuditTrailEntry};
use crate::calendar::HijriDate;
use crate::crypto::{FieldCipher, open_json, seal_json};
use crate::methodology::Methodology;
use crate::nisab::NisabBasis;
use crate::record::{NisabYearRecord, RecordStatus};
use crate::types::{Actor, NisabError};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordFinancials {
    total_wealth: Decimal,
    total_liabilities: Decimal,
    zakatable_wealth: Decimal,
    zakat_amount: Decimal,
    methodology: Methodology,
    asset_breakdown: AssetBreakdown,
    user_notes: Option<String>,
}

/// A record as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub hawl_start_date: DateTime<Utc>,
    pub hawl_start_date_hijri: HijriDate,
    pub hawl_completion_date: DateTime<Utc>,
    pub hawl_completion_date_hijri: HijriDate,
    pub nisab_basis: NisabBasis,
    pub nisab_threshold: Decimal,
    pub status: RecordStatus,
    pub finalized_at: Option<DateTime<Utc>>,
    pub hawl_interrupted_at: Option<DateTime<Utc>>,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    /// Sealed [`RecordFinancials`].
    pub financials: String,
}

impl SealedRecord {
    pub fn seal(record: &NisabYearRecord, cipher: &dyn FieldCipher) -> Result<Self, NisabError> {
        let financials = seal_json(
            cipher,
            &RecordFinancials {
                total_wealth: record.total_wealth,
                total_liabilities: record.total_liabilities,
                zakatable_wealth: record.zakatable_wealth,
                zakat_amount: record.zakat_amount,
                methodology: record.methodology,
                asset_breakdown: record.asset_breakdown.clone(),
                user_notes: record.user_notes.clone(),
            },
        )?;

        Ok(Self {
            id: record.id,
            user_id: record.user_id,
            hawl_start_date: record.hawl_start_date,
            hawl_start_date_hijri: record.hawl_start_date_hijri,
            hawl_completion_date: record.hawl_completion_date,
            hawl_completion_date_hijri: record.hawl_completion_date_hijri,
            nisab_basis: record.nisab_basis,
            nisab_threshold: record.nisab_threshold,
            status: record.status,
            finalized_at: record.finalized_at,
            hawl_interrupted_at: record.hawl_interrupted_at,
            is_primary: record.is_primary,
            created_at: record.created_at,
            updated_at: record.updated_at,
            version: record.version,
            financials,
        })
    }

    pub fn open(&self, cipher: &dyn FieldCipher) -> Result<NisabYearRecord, NisabError> {
        let f: RecordFinancials = open_json(cipher, &self.financials)?;
        Ok(NisabYearRecord {
            id: self.id,
            user_id: self.user_id,
            hawl_start_date: self.hawl_start_date,
            hawl_start_date_hijri: self.hawl_start_date_hijri,
            hawl_completion_date: self.hawl_completion_date,
            hawl_completion_date_hijri: self.hawl_completion_date_hijri,
            nisab_basis: self.nisab_basis,
            nisab_threshold: self.nisab_threshold,
            total_wealth: f.total_wealth,
            total_liabilities: f.total_liabilities,
            zakatable_wealth: f.zakatable_wealth,
            zakat_amount: f.zakat_amount,
            methodology: f.methodology,
            asset_breakdown: f.asset_breakdown,
            user_notes: f.user_notes,
            status: self.status,
            finalized_at: self.finalized_at,
            hawl_interrupted_at: self.hawl_interrupted_at,
            is_primary: self.is_primary,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

/// An audit entry as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedAuditEntry {
    pub id: Uuid,
    pub record_id: Uuid,
    /// Nil for the system actor.
    pub actor_id: Uuid,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    /// Sealed [`AuditEnvelope`].
    pub payload: String,
}

impl SealedAuditEntry {
    pub fn seal(entry: &AuditTrailEntry, cipher: &dyn FieldCipher) -> Result<Self, NisabError> {
        Ok(Self {
            id: entry.id,
            record_id: entry.record_id,
            actor_id: entry.actor.id(),
            event_type: entry.event_type,
            timestamp: entry.timestamp,
            payload: seal_json(cipher, &AuditEnvelope::new(entry.payload.clone()))?,
        })
    }

    pub fn open(&self, cipher: &dyn FieldCipher) -> Result<AuditTrailEntry, NisabError> {
        let envelope: AuditEnvelope = open_json(cipher, &self.payload)?;
        let payload = envelope.into_payload()?;
        if payload.event_type() != self.event_type {
            return Err(NisabError::storage(format!(
                "audit entry {} is tagged {} but carries a {} payload",
                self.id,
                self.event_type,
                payload.event_type()
            )));
        }
        Ok(AuditTrailEntry {
            id: self.id,
            record_id: self.record_id,
            actor: Actor::from_id(self.actor_id),
            event_type: self.event_type,
            timestamp: self.timestamp,
            payload,
        })
    }
}
