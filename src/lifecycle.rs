//! # Record Lifecycle
//!
//! Every user-facing and system-initiated operation on a [`NisabYearRecord`].
//!
//! All writes follow the same shape: load, validate through
//! [`RecordStatus::apply`], mutate, then commit the record together with its
//! audit entries under an optimistic version check. A concurrent writer makes
//! the commit fail with `ConcurrentModification` instead of being overwritten.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregator::{AssetBreakdown, WealthAggregator, WealthSummary};
use crate::audit::{AuditPayload, AuditTrail, AuditTrailEntry, PriceEvidence, RecordOrigin};
use crate::calendar::{self, HawlPeriod};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::holdings::{HoldingsSource, UserProfile};
use crate::methodology::Methodology;
use crate::pricing::{PriceOracle, PriceSource, ThresholdQuote};
use crate::record::{
    designate_primary, LifecycleAction, NewRecord, NisabYearRecord, RecordEdit, RecordFilter, RecordStatus,
};
use crate::store::{RecordRepository, RecordWrite, TrackerStore};
use crate::tracking::LiveTrackingView;
use crate::types::{Actor, NisabError};

/// A user's request to open a record by hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecord {
    pub methodology: Option<Methodology>,
    /// Defaults to now. May lie in the past, never in the future.
    pub hawl_start: Option<DateTime<Utc>>,
    /// When omitted, wealth and liabilities are read from the holdings source
    /// and the asset breakdown is captured.
    pub total_wealth: Option<Decimal>,
    pub total_liabilities: Option<Decimal>,
    pub user_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOptions {
    /// Finalize a Draft before its Hawl completes.
    pub allow_premature: bool,
}

/// A record with everything a detail screen needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDetail {
    pub record: NisabYearRecord,
    /// Present for Draft records when wealth and price could be read.
    pub live: Option<LiveTrackingView>,
    /// Why `live` is missing for a Draft record.
    pub live_error: Option<NisabError>,
    pub audit: Vec<AuditTrailEntry>,
}

pub struct RecordLifecycle {
    records: Arc<dyn RecordRepository>,
    audit: AuditTrail,
    oracle: PriceOracle,
    aggregator: Arc<WealthAggregator>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

impl RecordLifecycle {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        audit: AuditTrail,
        oracle: PriceOracle,
        aggregator: Arc<WealthAggregator>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self { records, audit, oracle, aggregator, clock, config }
    }

    /// Wires every collaborator from one store backing all three tables.
    pub fn with_store<S>(
        store: Arc<S>,
        prices: Arc<dyn PriceSource>,
        holdings: Arc<dyn HoldingsSource>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self
    where
        S: TrackerStore + 'static,
    {
        let oracle = PriceOracle::new(prices, store.clone(), clock.clone(), config.price_ttl());
        let audit = AuditTrail::new(store.clone(), clock.clone());
        let aggregator = Arc::new(WealthAggregator::new(holdings, config.aggregation_timeout()));
        Self::new(store, audit, oracle, aggregator, clock, config)
    }

    pub fn oracle(&self) -> &PriceOracle {
        &self.oracle
    }

    pub fn aggregator(&self) -> &WealthAggregator {
        &self.aggregator
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========== Reads ==========

    pub async fn list_records(&self, user_id: Uuid, filter: &RecordFilter) -> Result<Vec<NisabYearRecord>, NisabError> {
        let records = self.records.list_for_user(user_id).await?;
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }

    /// All records of a user, any status. Used by the detection sweep.
    pub async fn records_for_user(&self, user_id: Uuid) -> Result<Vec<NisabYearRecord>, NisabError> {
        self.records.list_for_user(user_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_record(&self, user_id: Uuid, record_id: Uuid) -> Result<RecordDetail, NisabError> {
        let record = self.load_owned(user_id, record_id).await?;
        let audit = self.audit.list_for(record_id).await?;

        let (live, live_error) = if record.status == RecordStatus::Draft {
            match self.live_view(&record).await {
                Ok(view) => (Some(view), None),
                Err(e) if e.is_user_error() => (None, Some(e)),
                Err(e) => return Err(e),
            }
        } else {
            (None, None)
        };

        Ok(RecordDetail { record, live, live_error, audit })
    }

    /// Re-reads wealth and price for a Draft without touching it.
    pub async fn refresh_preview(&self, user_id: Uuid, record_id: Uuid) -> Result<LiveTrackingView, NisabError> {
        let record = self.load_owned(user_id, record_id).await?;
        self.live_view(&record).await
    }

    pub async fn audit_trail(&self, user_id: Uuid, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, NisabError> {
        self.load_owned(user_id, record_id).await?;
        self.audit.list_for(record_id).await
    }

    // ========== Creation ==========

    /// Opens a Draft on the user's behalf.
    ///
    /// The threshold is locked from a usable price; `PriceUnavailable` propagates.
    #[tracing::instrument(skip(self, request))]
    pub async fn create(&self, user_id: Uuid, request: CreateRecord) -> Result<NisabYearRecord, NisabError> {
        let now = self.clock.now();
        let start = request.hawl_start.unwrap_or(now);
        if start > now {
            return Err(NisabError::invalid_input("hawlStart", "must not lie in the future"));
        }

        let methodology = request.methodology.unwrap_or(self.config.default_methodology);
        let threshold = self.oracle.threshold(methodology.nisab_basis()).await?;

        let (total_wealth, liabilities, breakdown) = match request.total_wealth {
            Some(wealth) => (wealth, request.total_liabilities.unwrap_or(Decimal::ZERO), AssetBreakdown::default()),
            None => {
                let summary = self.aggregator.aggregate(user_id).await?;
                let liabilities = request.total_liabilities.unwrap_or(summary.near_term_liabilities);
                (summary.total_wealth, liabilities, summary.breakdown)
            }
        };

        let existing = self.records.list_for_user(user_id).await?;
        let mut record = NisabYearRecord::new_draft(
            NewRecord {
                user_id,
                period: HawlPeriod::starting_at(start)?,
                methodology,
                nisab_threshold: threshold.threshold,
                total_wealth,
                liabilities,
                asset_breakdown: breakdown,
                user_notes: request.user_notes.filter(|n| !n.trim().is_empty()),
                is_primary: false,
            },
            now,
        )?;
        let handoff = self.hand_off_primary(existing, record.id, Some(&mut record));

        let entries = self
            .audit
            .prepare(record.id, Actor::User(user_id), vec![created_payload(&record, RecordOrigin::Manual)])
            .await?;
        self.insert(&record, &entries, &handoff).await?;

        tracing::info!(record_id = %record.id, %user_id, "record created");
        Ok(record)
    }

    /// Opens a Draft for a user whose wealth reached the Nisab, on behalf of the sweep.
    pub async fn create_detected(
        &self,
        profile: &UserProfile,
        summary: &WealthSummary,
        threshold: &ThresholdQuote,
        period: HawlPeriod,
    ) -> Result<NisabYearRecord, NisabError> {
        let now = self.clock.now();
        let existing = self.records.list_for_user(profile.user_id).await?;

        let mut record = NisabYearRecord::new_draft(
            NewRecord {
                user_id: profile.user_id,
                period,
                methodology: profile.methodology,
                nisab_threshold: threshold.threshold,
                total_wealth: summary.total_wealth,
                liabilities: summary.near_term_liabilities,
                asset_breakdown: summary.breakdown.clone(),
                user_notes: None,
                is_primary: false,
            },
            now,
        )?;
        let handoff = self.hand_off_primary(existing, record.id, Some(&mut record));

        let payloads = vec![
            created_payload(&record, RecordOrigin::Detected),
            AuditPayload::NisabAchieved {
                wealth: record.zakatable_wealth,
                threshold: threshold.threshold,
                basis: threshold.basis,
                price_is_stale: threshold.price.is_stale,
            },
        ];
        let entries = self.audit.prepare(record.id, Actor::System, payloads).await?;
        self.insert(&record, &entries, &handoff).await?;

        tracing::info!(record_id = %record.id, user_id = %profile.user_id, "nisab achieved; hawl started");
        Ok(record)
    }

    // ========== Transitions ==========

    /// Edits a Draft or Unlocked record.
    ///
    /// Draft edits write no audit entry. Unlocked edits append EDITED with
    /// before and after snapshots. An edit that changes nothing writes nothing.
    #[tracing::instrument(skip(self, edit))]
    pub async fn edit(
        &self,
        user_id: Uuid,
        record_id: Uuid,
        expected_version: Option<u64>,
        edit: RecordEdit,
    ) -> Result<NisabYearRecord, NisabError> {
        let mut record = self.load_for_write(user_id, record_id, expected_version).await?;
        let outcome = record.status.apply(LifecycleAction::Edit, record_id)?;

        let before = record.snapshot();
        let changed_fields = record.apply_edit(&edit)?;
        if changed_fields.is_empty() {
            return Ok(record);
        }
        if let Some(to) = outcome.status() {
            record.status = to;
        }

        let payloads = match record.status {
            RecordStatus::Unlocked => vec![AuditPayload::Edited {
                before,
                after: record.snapshot(),
                changed_fields,
            }],
            _ => Vec::new(),
        };
        self.commit(record, Actor::User(user_id), payloads, Vec::new()).await
    }

    /// Finalizes a Draft (Hawl must be complete unless overridden) or re-finalizes
    /// an Unlocked record. Both require a usable price for the record's basis.
    #[tracing::instrument(skip(self))]
    pub async fn finalize(
        &self,
        user_id: Uuid,
        record_id: Uuid,
        expected_version: Option<u64>,
        options: FinalizeOptions,
    ) -> Result<NisabYearRecord, NisabError> {
        let mut record = self.load_for_write(user_id, record_id, expected_version).await?;
        let from = record.status;
        let outcome = record.status.apply(LifecycleAction::Finalize, record_id)?;

        let now = self.clock.now();
        let days_remaining = calendar::days_remaining(record.hawl_completion_date, now);
        if from == RecordStatus::Draft && days_remaining > 0 && !options.allow_premature {
            return Err(NisabError::PrematureFinalization { record_id, days_remaining });
        }

        let quote = self.oracle.get_price(record.nisab_basis.metal()).await?;
        let price = PriceEvidence::from_quote(record.nisab_basis, &quote, now, self.config.stale_warning_age());
        if price.needs_warning {
            tracing::warn!(%record_id, as_of = %price.as_of, "finalizing against a stale price");
        }

        record.recompute();
        if let Some(to) = outcome.status() {
            record.status = to;
        }
        record.finalized_at = Some(now);

        let payload = match from {
            RecordStatus::Draft => AuditPayload::Finalized {
                zakatable_wealth: record.zakatable_wealth,
                zakat_amount: record.zakat_amount,
                premature_override: days_remaining > 0,
                days_remaining,
                price,
            },
            _ => AuditPayload::Refinalized {
                zakatable_wealth: record.zakatable_wealth,
                zakat_amount: record.zakat_amount,
                price,
            },
        };

        let records = self.records.list_for_user(user_id).await?;
        let handoff = self.hand_off_primary(records, record_id, Some(&mut record));
        let record = self.commit(record, Actor::User(user_id), vec![payload], handoff).await?;
        tracing::info!(%record_id, %from, amount = %record.zakat_amount, "record finalized");
        Ok(record)
    }

    /// Reopens a Finalized record. The trimmed reason must reach the configured minimum length.
    #[tracing::instrument(skip(self, reason))]
    pub async fn unlock(
        &self,
        user_id: Uuid,
        record_id: Uuid,
        expected_version: Option<u64>,
        reason: &str,
    ) -> Result<NisabYearRecord, NisabError> {
        let mut record = self.load_for_write(user_id, record_id, expected_version).await?;
        let outcome = record.status.apply(LifecycleAction::Unlock, record_id)?;

        let reason = reason.trim();
        let actual_length = reason.chars().count();
        let min_length = self.config.unlock_reason_min_chars;
        if actual_length < min_length {
            return Err(NisabError::UnlockReasonTooShort { min_length, actual_length });
        }

        if let Some(to) = outcome.status() {
            record.status = to;
        }
        let payload = AuditPayload::Unlocked { reason: reason.to_string() };
        let record = self.commit(record, Actor::User(user_id), vec![payload], Vec::new()).await?;

        tracing::info!(%record_id, "record unlocked");
        Ok(record)
    }

    /// Deletes a Draft record and its audit trail. When it was primary, the flag
    /// moves to the next record in line in the same commit.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, record_id: Uuid, expected_version: Option<u64>) -> Result<(), NisabError> {
        let record = self.load_for_write(user_id, record_id, expected_version).await?;
        record.status.apply(LifecycleAction::Delete, record_id)?;

        let records = self.records.list_for_user(user_id).await?;
        let handoff = self.hand_off_primary(records, record_id, None);
        let mut writes = vec![RecordWrite::DeleteDraft { record_id, expected_version: record.version }];
        writes.extend(flag_writes(&handoff));
        self.records.commit(&writes, &[]).await?;

        tracing::info!(%record_id, "draft deleted");
        Ok(())
    }

    /// Marks a Draft's Hawl as interrupted. Returns `false` when the record is
    /// not a Draft or was already flagged; the flag is never cleared automatically.
    #[tracing::instrument(skip(self))]
    pub async fn flag_interruption(
        &self,
        record_id: Uuid,
        wealth: Decimal,
        threshold: Decimal,
    ) -> Result<bool, NisabError> {
        let mut record = self
            .records
            .get(record_id)
            .await?
            .ok_or(NisabError::RecordNotFound { record_id })?;

        if record.status != RecordStatus::Draft || record.hawl_interrupted_at.is_some() {
            return Ok(false);
        }

        let now = self.clock.now();
        record.hawl_interrupted_at = Some(now);
        let payload = AuditPayload::HawlInterrupted { wealth, threshold, detected_at: now };
        self.commit(record, Actor::System, vec![payload], Vec::new()).await?;

        tracing::warn!(%record_id, %wealth, %threshold, "hawl interrupted");
        Ok(true)
    }

    // ========== Internals ==========

    async fn live_view(&self, record: &NisabYearRecord) -> Result<LiveTrackingView, NisabError> {
        if record.status != RecordStatus::Draft {
            return Err(NisabError::invalid_input(
                "status",
                format!("live tracking is only available for DRAFT records, record is {}", record.status),
            ));
        }
        let summary = self.aggregator.aggregate(record.user_id).await?;
        let threshold = self.oracle.threshold(record.nisab_basis).await?;
        LiveTrackingView::compute(record, &summary, &threshold, self.clock.now(), self.config.stale_warning_age())
    }

    /// Moves `is_primary` to where [`designate_primary`] puts it once `changed`
    /// replaces record `record_id` (or, with `None`, once that record is gone).
    ///
    /// Sets the flag on `changed` and returns the other records whose flag
    /// flips, re-versioned and paired with the version they were loaded at.
    fn hand_off_primary(
        &self,
        records: Vec<NisabYearRecord>,
        record_id: Uuid,
        changed: Option<&mut NisabYearRecord>,
    ) -> Vec<(NisabYearRecord, u64)> {
        let others: Vec<NisabYearRecord> = records.into_iter().filter(|r| r.id != record_id).collect();
        let primary = designate_primary(others.iter().chain(changed.as_deref()));
        if let Some(record) = changed {
            record.is_primary = primary == Some(record.id);
        }

        let now = self.clock.now();
        others
            .into_iter()
            .filter(|r| r.is_primary != (primary == Some(r.id)))
            .map(|mut r| {
                let loaded_version = r.version;
                r.is_primary = !r.is_primary;
                r.version = loaded_version + 1;
                r.updated_at = now;
                tracing::debug!(record_id = %r.id, is_primary = r.is_primary, "primary flag moved");
                (r, loaded_version)
            })
            .collect()
    }

    async fn insert(
        &self,
        record: &NisabYearRecord,
        entries: &[AuditTrailEntry],
        handoff: &[(NisabYearRecord, u64)],
    ) -> Result<(), NisabError> {
        let mut writes = vec![RecordWrite::Insert(record)];
        writes.extend(flag_writes(handoff));
        self.records.commit(&writes, entries).await
    }

    /// Loads a record, hiding other users' records behind `RecordNotFound`.
    async fn load_owned(&self, user_id: Uuid, record_id: Uuid) -> Result<NisabYearRecord, NisabError> {
        match self.records.get(record_id).await? {
            Some(record) if record.user_id == user_id => Ok(record),
            _ => Err(NisabError::RecordNotFound { record_id }),
        }
    }

    async fn load_for_write(
        &self,
        user_id: Uuid,
        record_id: Uuid,
        expected_version: Option<u64>,
    ) -> Result<NisabYearRecord, NisabError> {
        let record = self.load_owned(user_id, record_id).await?;
        match expected_version {
            Some(expected) if expected != record.version => Err(NisabError::ConcurrentModification {
                record_id,
                expected_version: expected,
                actual_version: record.version,
            }),
            _ => Ok(record),
        }
    }

    /// Bumps the version and commits the record with its audit entries and any
    /// primary-flag hand-off.
    async fn commit(
        &self,
        mut record: NisabYearRecord,
        actor: Actor,
        payloads: Vec<AuditPayload>,
        handoff: Vec<(NisabYearRecord, u64)>,
    ) -> Result<NisabYearRecord, NisabError> {
        let expected_version = record.version;
        let entries = if payloads.is_empty() {
            Vec::new()
        } else {
            self.audit.prepare(record.id, actor, payloads).await?
        };

        record.version = expected_version + 1;
        record.updated_at = self.clock.now();

        let mut writes = vec![RecordWrite::Update { record: &record, expected_version }];
        writes.extend(flag_writes(&handoff));
        self.records.commit(&writes, &entries).await?;
        Ok(record)
    }
}

fn flag_writes(handoff: &[(NisabYearRecord, u64)]) -> impl Iterator<Item = RecordWrite<'_>> {
    handoff
        .iter()
        .map(|(record, expected_version)| RecordWrite::Update { record, expected_version: *expected_version })
}

fn created_payload(record: &NisabYearRecord, origin: RecordOrigin) -> AuditPayload {
    AuditPayload::Created {
        origin,
        total_wealth: record.total_wealth,
        nisab_threshold: record.nisab_threshold,
        hawl_start_date: record.hawl_start_date,
        hawl_completion_date: record.hawl_completion_date,
    }
}
