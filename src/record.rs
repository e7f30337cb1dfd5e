//! # Nisab Year Record
//!
//! One compliance period for one user, together with the status sum type and the
//! single function deciding which lifecycle actions are legal from which status.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::aggregator::AssetBreakdown;
use crate::calendar::{HawlPeriod, HijriDate};
use crate::methodology::{self, Methodology, MethodologyInput};
use crate::nisab::NisabBasis;
use crate::types::NisabError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash,
    Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter, schemars::JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Draft,
    Finalized,
    Unlocked,
}

/// A user- or system-requested change to a record's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleAction {
    Edit,
    Finalize,
    Unlock,
    Delete,
}

/// Where a legal action leaves the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Status(RecordStatus),
    Removed,
}

impl TransitionOutcome {
    /// The status a kept record moves to; `None` when the record is removed.
    pub fn status(self) -> Option<RecordStatus> {
        match self {
            TransitionOutcome::Status(status) => Some(status),
            TransitionOutcome::Removed => None,
        }
    }
}

impl RecordStatus {
    /// The transition table. Every status check in the crate goes through here.
    ///
    /// | From      | Action   | To        |
    /// |-----------|----------|-----------|
    /// | Draft     | edit     | Draft     |
    /// | Draft     | finalize | Finalized |
    /// | Draft     | delete   | (removed) |
    /// | Finalized | unlock   | Unlocked  |
    /// | Unlocked  | edit     | Unlocked  |
    /// | Unlocked  | finalize | Finalized |
    pub fn apply(self, action: LifecycleAction, record_id: Uuid) -> Result<TransitionOutcome, NisabError> {
        use LifecycleAction::*;
        use RecordStatus::*;

        match (self, action) {
            (Draft, Edit) => Ok(TransitionOutcome::Status(Draft)),
            (Draft, Finalize) => Ok(TransitionOutcome::Status(Finalized)),
            (Draft, Delete) => Ok(TransitionOutcome::Removed),
            (Finalized, Unlock) => Ok(TransitionOutcome::Status(Unlocked)),
            (Unlocked, Edit) => Ok(TransitionOutcome::Status(Unlocked)),
            (Unlocked, Finalize) => Ok(TransitionOutcome::Status(Finalized)),

            (Finalized, Edit) => Err(NisabError::RecordLocked { record_id }),
            (Finalized | Unlocked, Delete) => Err(NisabError::DeleteForbidden { record_id, status: self }),
            (from, action) => Err(NisabError::InvalidTransition {
                from,
                to: action.attempted_target(from),
            }),
        }
    }

    /// Whether financial figures are still recomputed on edit.
    pub fn is_mutable(&self) -> bool {
        matches!(self, RecordStatus::Draft | RecordStatus::Unlocked)
    }
}

impl LifecycleAction {
    fn attempted_target(&self, from: RecordStatus) -> String {
        match self {
            LifecycleAction::Edit => from.to_string(),
            LifecycleAction::Finalize => RecordStatus::Finalized.to_string(),
            LifecycleAction::Unlock => RecordStatus::Unlocked.to_string(),
            LifecycleAction::Delete => "DELETED".to_string(),
        }
    }
}

/// One Hawl for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NisabYearRecord {
    pub id: Uuid,
    pub user_id: Uuid,

    pub hawl_start_date: DateTime<Utc>,
    pub hawl_start_date_hijri: HijriDate,
    pub hawl_completion_date: DateTime<Utc>,
    pub hawl_completion_date_hijri: HijriDate,
    pub nisab_basis: NisabBasis,
    /// Currency threshold locked at Hawl start.
    pub nisab_threshold: Decimal,

    pub total_wealth: Decimal,
    /// Liabilities recognized by the record's methodology.
    pub total_liabilities: Decimal,
    pub zakatable_wealth: Decimal,
    pub zakat_amount: Decimal,
    pub methodology: Methodology,
    pub asset_breakdown: AssetBreakdown,
    pub user_notes: Option<String>,

    pub status: RecordStatus,
    pub finalized_at: Option<DateTime<Utc>>,
    /// Set when wealth dropped below the locked threshold during the Hawl.
    pub hawl_interrupted_at: Option<DateTime<Utc>>,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by every successful write.
    pub version: u64,
}

/// Inputs for a brand-new Draft record.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub user_id: Uuid,
    pub period: HawlPeriod,
    pub methodology: Methodology,
    pub nisab_threshold: Decimal,
    pub total_wealth: Decimal,
    pub liabilities: Decimal,
    pub asset_breakdown: AssetBreakdown,
    pub user_notes: Option<String>,
    pub is_primary: bool,
}

impl NisabYearRecord {
    pub fn new_draft(new: NewRecord, now: DateTime<Utc>) -> Result<Self, NisabError> {
        if new.period.start >= new.period.completion {
            return Err(NisabError::invalid_input("hawl_start_date", "must precede the completion date"));
        }
        if new.total_wealth < Decimal::ZERO || new.liabilities < Decimal::ZERO {
            return Err(NisabError::invalid_input("total_wealth", "amounts must be non-negative"));
        }

        let mut record = Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            hawl_start_date: new.period.start,
            hawl_start_date_hijri: new.period.start_hijri,
            hawl_completion_date: new.period.completion,
            hawl_completion_date_hijri: new.period.completion_hijri,
            nisab_basis: new.methodology.nisab_basis(),
            nisab_threshold: new.nisab_threshold,
            total_wealth: new.total_wealth,
            total_liabilities: new.liabilities,
            zakatable_wealth: Decimal::ZERO,
            zakat_amount: Decimal::ZERO,
            methodology: new.methodology,
            asset_breakdown: new.asset_breakdown,
            user_notes: new.user_notes,
            status: RecordStatus::Draft,
            finalized_at: None,
            hawl_interrupted_at: None,
            is_primary: new.is_primary,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        record.recompute();
        Ok(record)
    }

    /// Re-derives zakatable wealth and the amount due against the locked threshold.
    /// No-op unless the record is Draft or Unlocked.
    pub fn recompute(&mut self) {
        if !self.status.is_mutable() {
            return;
        }
        let result = methodology::calculate(&MethodologyInput {
            wealth: self.total_wealth,
            liabilities: self.total_liabilities,
            methodology: self.methodology,
            nisab_threshold: self.nisab_threshold,
        });
        self.total_liabilities = result.deductible_liabilities;
        self.zakatable_wealth = result.zakatable_wealth;
        self.zakat_amount = result.amount_due;
    }

    /// Applies the edit's fields and recomputes. Returns the names of fields whose
    /// stored value differs afterwards; a value the methodology discards on
    /// recompute does not count as a change.
    pub fn apply_edit(&mut self, edit: &RecordEdit) -> Result<Vec<String>, NisabError> {
        edit.validate()?;
        let before = self.snapshot();

        if let Some(wealth) = edit.total_wealth {
            self.total_wealth = wealth;
        }
        if let Some(liabilities) = edit.total_liabilities {
            self.total_liabilities = liabilities;
        }
        if let Some(methodology) = edit.methodology {
            self.methodology = methodology;
        }
        if let Some(notes) = &edit.user_notes {
            self.user_notes = Some(notes.clone()).filter(|n| !n.trim().is_empty());
        }
        self.recompute();

        let after = self.snapshot();
        let mut changed = Vec::new();
        if before.total_wealth != after.total_wealth {
            changed.push("totalWealth".to_string());
        }
        if before.total_liabilities != after.total_liabilities {
            changed.push("totalLiabilities".to_string());
        }
        if before.methodology != after.methodology {
            changed.push("methodology".to_string());
        }
        if before.user_notes != after.user_notes {
            changed.push("userNotes".to_string());
        }
        Ok(changed)
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            total_wealth: self.total_wealth,
            total_liabilities: self.total_liabilities,
            zakatable_wealth: self.zakatable_wealth,
            zakat_amount: self.zakat_amount,
            methodology: self.methodology,
            user_notes: self.user_notes.clone(),
        }
    }

    pub fn is_hawl_complete(&self, now: DateTime<Utc>) -> bool {
        now >= self.hawl_completion_date
    }

    /// Ordering of a user's records: oldest Hawl first.
    pub fn hawl_order(&self) -> (DateTime<Utc>, DateTime<Utc>, Uuid) {
        (self.hawl_start_date, self.created_at, self.id)
    }

    /// Gregorian year the Hawl started in, used for list filtering.
    pub fn start_year(&self) -> i32 {
        self.hawl_start_date.year()
    }
}

/// The record among one user's records that should carry `is_primary`.
///
/// The oldest Draft is the one being tracked; with no Draft, the most recent
/// Hawl stays primary.
pub fn designate_primary<'a>(records: impl IntoIterator<Item = &'a NisabYearRecord>) -> Option<Uuid> {
    let records: Vec<&NisabYearRecord> = records.into_iter().collect();
    records
        .iter()
        .filter(|r| r.status == RecordStatus::Draft)
        .min_by_key(|r| r.hawl_order())
        .or_else(|| records.iter().max_by_key(|r| r.hawl_order()))
        .map(|r| r.id)
}

/// Editable subset of a record's fields. `None` leaves a field unchanged;
/// an empty `user_notes` string clears the notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEdit {
    pub total_wealth: Option<Decimal>,
    pub total_liabilities: Option<Decimal>,
    pub methodology: Option<Methodology>,
    pub user_notes: Option<String>,
}

impl RecordEdit {
    pub fn total_wealth(mut self, value: impl crate::inputs::IntoMoney) -> Result<Self, NisabError> {
        self.total_wealth = Some(value.into_money()?);
        Ok(self)
    }

    pub fn total_liabilities(mut self, value: impl crate::inputs::IntoMoney) -> Result<Self, NisabError> {
        self.total_liabilities = Some(value.into_money()?);
        Ok(self)
    }

    pub fn methodology(mut self, methodology: Methodology) -> Self {
        self.methodology = Some(methodology);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.user_notes = Some(notes.into());
        self
    }

    fn validate(&self) -> Result<(), NisabError> {
        if self.total_wealth.is_some_and(|w| w < Decimal::ZERO) {
            return Err(NisabError::invalid_input("totalWealth", "must be non-negative"));
        }
        if self.total_liabilities.is_some_and(|l| l < Decimal::ZERO) {
            return Err(NisabError::invalid_input("totalLiabilities", "must be non-negative"));
        }
        Ok(())
    }
}

/// Financial fields captured before and after an edit of an unlocked record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    pub total_wealth: Decimal,
    pub total_liabilities: Decimal,
    pub zakatable_wealth: Decimal,
    pub zakat_amount: Decimal,
    pub methodology: Methodology,
    pub user_notes: Option<String>,
}

/// List filter for a user's records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    pub status: Option<RecordStatus>,
    /// Gregorian year of the Hawl start.
    pub year: Option<i32>,
}

impl RecordFilter {
    pub fn matches(&self, record: &NisabYearRecord) -> bool {
        self.status.is_none_or(|s| s == record.status)
            && self.year.is_none_or(|y| y == record.start_year())
    }
}
