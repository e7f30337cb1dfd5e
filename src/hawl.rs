//! # Hawl Tracker
//!
//! Decides, from a user's current wealth and their open Draft records, what the
//! detection sweep should do next. Holds no state of its own.
//!
//! ## Rules
//! - **Start**: no Draft exists and wealth reached the threshold.
//! - **Interrupt**: the active Draft exists and wealth fell below its locked threshold.
//! - **Complete**: the active Draft reached its completion date.
//! - **Continue**: nothing to do.
//!
//! When several Drafts exist, only the oldest one is active. The others are
//! reported back for the user to resolve by hand.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar;
use crate::record::{NisabYearRecord, RecordStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HawlVerdict {
    /// Nisab reached with no open period: a new Hawl begins.
    Start {
        hawl_start: DateTime<Utc>,
        hawl_completion: DateTime<Utc>,
    },
    /// The active period's wealth dropped below its locked threshold.
    Interrupt {
        record_id: Uuid,
        wealth: Decimal,
        threshold: Decimal,
    },
    /// The active period reached its completion date and awaits finalization.
    Complete { record_id: Uuid },
    Continue,
}

impl HawlVerdict {
    pub fn is_continue(&self) -> bool {
        matches!(self, HawlVerdict::Continue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HawlAssessment {
    pub verdict: HawlVerdict,
    pub active_record_id: Option<Uuid>,
    /// Drafts other than the active one, oldest first. Never merged automatically.
    pub unresolved_drafts: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HawlTracker;

impl HawlTracker {
    pub fn new() -> Self {
        Self
    }

    /// Splits a user's records into the active Draft and the remaining Drafts.
    ///
    /// Non-Draft records are ignored. Age is ordered by Hawl start, then creation time.
    pub fn partition_drafts<'a>(&self, records: &'a [NisabYearRecord]) -> (Option<&'a NisabYearRecord>, Vec<Uuid>) {
        let mut drafts: Vec<&NisabYearRecord> =
            records.iter().filter(|r| r.status == RecordStatus::Draft).collect();
        drafts.sort_by_key(|r| r.hawl_order());

        let mut iter = drafts.into_iter();
        let active = iter.next();
        (active, iter.map(|r| r.id).collect())
    }

    /// Evaluates one user.
    ///
    /// `wealth` is the user's current zakatable wealth. `threshold` is the current
    /// Nisab threshold and is only consulted for a Start; an active record is
    /// always judged against the threshold it locked at its own start.
    pub fn assess(
        &self,
        now: DateTime<Utc>,
        wealth: Decimal,
        threshold: Decimal,
        records: &[NisabYearRecord],
    ) -> HawlAssessment {
        let (active, unresolved_drafts) = self.partition_drafts(records);

        let verdict = match active {
            None if wealth > Decimal::ZERO && wealth >= threshold => HawlVerdict::Start {
                hawl_start: now,
                hawl_completion: calendar::hawl_completion(now),
            },
            None => HawlVerdict::Continue,
            Some(record) if wealth < record.nisab_threshold => HawlVerdict::Interrupt {
                record_id: record.id,
                wealth,
                threshold: record.nisab_threshold,
            },
            Some(record) if record.is_hawl_complete(now) => HawlVerdict::Complete { record_id: record.id },
            Some(_) => HawlVerdict::Continue,
        };

        HawlAssessment {
            verdict,
            active_record_id: active.map(|r| r.id),
            unresolved_drafts,
        }
    }
}
