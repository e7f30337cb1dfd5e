//! # Audit Trail
//!
//! Append-only history of everything that happened to a record. Payloads are
//! typed per event and wrapped in a versioned envelope before sealing, so that
//! opening a stored payload yields a concrete Rust value rather than a loose map.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::nisab::NisabBasis;
use crate::pricing::PriceQuote;
use crate::record::RecordSnapshot;
use crate::types::{Actor, NisabError};

/// Current layout version of [`AuditEnvelope`].
pub const AUDIT_PAYLOAD_VERSION: u16 = 1;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash,
    Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter, schemars::JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Created,
    NisabAchieved,
    HawlInterrupted,
    Unlocked,
    Edited,
    Refinalized,
    Finalized,
}

/// How a record came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RecordOrigin {
    /// Created explicitly by the user.
    Manual,
    /// Opened by the background sweep when wealth reached the Nisab.
    Detected,
}

/// Event-specific audit data. The variant determines the entry's event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditPayload {
    #[serde(rename_all = "camelCase")]
    Created {
        origin: RecordOrigin,
        total_wealth: Decimal,
        nisab_threshold: Decimal,
        hawl_start_date: DateTime<Utc>,
        hawl_completion_date: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    NisabAchieved {
        wealth: Decimal,
        threshold: Decimal,
        basis: NisabBasis,
        /// True when the threshold came from an expired price.
        price_is_stale: bool,
    },
    #[serde(rename_all = "camelCase")]
    HawlInterrupted {
        wealth: Decimal,
        threshold: Decimal,
        detected_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Unlocked { reason: String },
    #[serde(rename_all = "camelCase")]
    Edited {
        before: RecordSnapshot,
        after: RecordSnapshot,
        changed_fields: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Finalized {
        zakatable_wealth: Decimal,
        zakat_amount: Decimal,
        /// Set when the user finalized before the Hawl completed.
        premature_override: bool,
        days_remaining: i64,
        price: PriceEvidence,
    },
    #[serde(rename_all = "camelCase")]
    Refinalized {
        zakatable_wealth: Decimal,
        zakat_amount: Decimal,
        price: PriceEvidence,
    },
}

/// The price quote a finalization was confirmed against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceEvidence {
    pub basis: NisabBasis,
    pub price_per_gram: Decimal,
    pub as_of: DateTime<Utc>,
    pub is_stale: bool,
    /// Stale and older than the warning age; the user must be told.
    pub needs_warning: bool,
}

impl PriceEvidence {
    pub fn from_quote(basis: NisabBasis, quote: &PriceQuote, now: DateTime<Utc>, max_age: chrono::Duration) -> Self {
        Self {
            basis,
            price_per_gram: quote.price_per_gram,
            as_of: quote.as_of,
            is_stale: quote.is_stale,
            needs_warning: quote.needs_staleness_warning(now, max_age),
        }
    }
}

impl AuditPayload {
    pub fn event_type(&self) -> AuditEventType {
        match self {
            AuditPayload::Created { .. } => AuditEventType::Created,
            AuditPayload::NisabAchieved { .. } => AuditEventType::NisabAchieved,
            AuditPayload::HawlInterrupted { .. } => AuditEventType::HawlInterrupted,
            AuditPayload::Unlocked { .. } => AuditEventType::Unlocked,
            AuditPayload::Edited { .. } => AuditEventType::Edited,
            AuditPayload::Finalized { .. } => AuditEventType::Finalized,
            AuditPayload::Refinalized { .. } => AuditEventType::Refinalized,
        }
    }
}

/// The sealed form of a payload: schema version plus the typed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEnvelope {
    pub version: u16,
    pub payload: AuditPayload,
}

impl AuditEnvelope {
    pub fn new(payload: AuditPayload) -> Self {
        Self { version: AUDIT_PAYLOAD_VERSION, payload }
    }

    pub fn into_payload(self) -> Result<AuditPayload, NisabError> {
        if self.version != AUDIT_PAYLOAD_VERSION {
            return Err(NisabError::storage(format!(
                "unsupported audit payload version {}",
                self.version
            )));
        }
        Ok(self.payload)
    }
}

/// One immutable fact about a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrailEntry {
    pub id: Uuid,
    pub record_id: Uuid,
    pub actor: Actor,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub payload: AuditPayload,
}

impl AuditTrailEntry {
    /// Stamps a new entry. The timestamp never precedes `floor`, the newest
    /// existing entry of the same record.
    pub fn stamp(
        record_id: Uuid,
        actor: Actor,
        payload: AuditPayload,
        now: DateTime<Utc>,
        floor: Option<DateTime<Utc>>,
    ) -> Self {
        let timestamp = floor.map_or(now, |f| f.max(now));
        Self {
            id: Uuid::new_v4(),
            record_id,
            actor,
            event_type: payload.event_type(),
            timestamp,
            payload,
        }
    }
}

#[cfg(feature = "async")]
pub use self::trail::AuditTrail;

#[cfg(feature = "async")]
mod trail {
    use super::*;
    use std::sync::Arc;

    use crate::clock::Clock;
    use crate::store::AuditRepository;

    /// Write-once log access. There is deliberately no update or delete.
    #[derive(Clone)]
    pub struct AuditTrail {
        repository: Arc<dyn AuditRepository>,
        clock: Arc<dyn Clock>,
    }

    impl AuditTrail {
        pub fn new(repository: Arc<dyn AuditRepository>, clock: Arc<dyn Clock>) -> Self {
            Self { repository, clock }
        }

        /// Builds entries for one record in order, without persisting them.
        ///
        /// Used when the entries must be committed together with a record write.
        pub async fn prepare(
            &self,
            record_id: Uuid,
            actor: Actor,
            payloads: Vec<AuditPayload>,
        ) -> Result<Vec<AuditTrailEntry>, NisabError> {
            let mut floor = self.repository.latest_timestamp(record_id).await?;
            let now = self.clock.now();

            let entries: Vec<AuditTrailEntry> = payloads
                .into_iter()
                .map(|payload| {
                    let entry = AuditTrailEntry::stamp(record_id, actor, payload, now, floor);
                    floor = Some(entry.timestamp);
                    entry
                })
                .collect();
            Ok(entries)
        }

        /// Appends one entry. Fails when the record is unknown or storage is unavailable.
        pub async fn append(
            &self,
            record_id: Uuid,
            actor: Actor,
            payload: AuditPayload,
        ) -> Result<AuditTrailEntry, NisabError> {
            let mut entries = self.prepare(record_id, actor, vec![payload]).await?;
            let entry = entries
                .pop()
                .ok_or_else(|| NisabError::storage("audit entry was not stamped"))?;
            self.repository.append(&entry).await?;
            tracing::debug!(%record_id, event = %entry.event_type, "audit entry appended");
            Ok(entry)
        }

        /// Entries of a record, oldest first.
        pub async fn list_for(&self, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, NisabError> {
            self.repository.list_for(record_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_type_follows_payload() {
        let payload = AuditPayload::Unlocked { reason: "wrong gold price".to_string() };
        let entry = AuditTrailEntry::stamp(Uuid::nil(), Actor::System, payload, Utc::now(), None);
        assert_eq!(entry.event_type, AuditEventType::Unlocked);
    }

    #[test]
    fn test_stamp_never_goes_backwards() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let payload = AuditPayload::Unlocked { reason: "recount the gold".to_string() };
        let entry = AuditTrailEntry::stamp(Uuid::nil(), Actor::System, payload, t - Duration::minutes(5), Some(t));
        assert_eq!(entry.timestamp, t);
    }

    #[test]
    fn test_envelope_serializes_tagged() {
        let envelope = AuditEnvelope::new(AuditPayload::HawlInterrupted {
            wealth: dec!(3000),
            threshold: dec!(5000),
            detected_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["payload"]["event"], "HAWL_INTERRUPTED");
        assert_eq!(json["payload"]["data"]["threshold"], "5000");

        let back: AuditEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back.into_payload().unwrap().event_type(), AuditEventType::HawlInterrupted);
    }

    #[test]
    fn test_unknown_envelope_version_rejected() {
        let envelope = AuditEnvelope {
            version: 99,
            payload: AuditPayload::Unlocked { reason: "x".repeat(12) },
        };
        assert_eq!(envelope.into_payload().unwrap_err().code(), "STORAGE");
    }
}
