//! # Live Tracking
//!
//! A read-only projection of a Draft record against the user's wealth right now.
//! Computed on demand and never stored; clients poll for it.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::WealthSummary;
use crate::calendar;
use crate::methodology::{self, MethodologyInput};
use crate::pricing::ThresholdQuote;
use crate::record::{NisabYearRecord, RecordStatus};
use crate::types::NisabError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveTrackingView {
    pub record_id: Uuid,
    pub computed_at: DateTime<Utc>,

    pub current_wealth: Decimal,
    pub current_liabilities: Decimal,
    pub current_zakatable_wealth: Decimal,
    /// Threshold the record locked at Hawl start; governs interruption and the due amount.
    pub locked_threshold: Decimal,
    /// Threshold at today's metal price, for display.
    pub current_threshold: Decimal,
    pub projected_amount_due: Decimal,
    pub is_above_nisab: bool,

    pub days_elapsed: i64,
    pub days_remaining: i64,
    pub percent_elapsed: Decimal,
    pub is_hawl_complete: bool,
    /// Whether finalization would succeed now without a premature override.
    pub can_finalize: bool,

    pub price_as_of: DateTime<Utc>,
    pub price_is_stale: bool,
    /// The stale price is old enough that the user must be told.
    pub price_needs_warning: bool,
    pub is_interrupted: bool,
}

impl LiveTrackingView {
    pub fn compute(
        record: &NisabYearRecord,
        wealth: &WealthSummary,
        threshold: &ThresholdQuote,
        now: DateTime<Utc>,
        stale_warning_age: Duration,
    ) -> Result<Self, NisabError> {
        if record.status != RecordStatus::Draft {
            return Err(NisabError::invalid_input(
                "status",
                format!("live tracking is only available for DRAFT records, record is {}", record.status),
            ));
        }

        let result = methodology::calculate(&MethodologyInput {
            wealth: wealth.total_wealth,
            liabilities: wealth.near_term_liabilities,
            methodology: record.methodology,
            nisab_threshold: record.nisab_threshold,
        });
        let is_hawl_complete = record.is_hawl_complete(now);

        Ok(Self {
            record_id: record.id,
            computed_at: now,
            current_wealth: wealth.total_wealth,
            current_liabilities: result.deductible_liabilities,
            current_zakatable_wealth: result.zakatable_wealth,
            locked_threshold: record.nisab_threshold,
            current_threshold: threshold.threshold,
            projected_amount_due: result.amount_due,
            is_above_nisab: result.is_above_nisab,
            days_elapsed: calendar::days_elapsed(record.hawl_start_date, now),
            days_remaining: calendar::days_remaining(record.hawl_completion_date, now),
            percent_elapsed: calendar::percent_elapsed(record.hawl_start_date, record.hawl_completion_date, now),
            is_hawl_complete,
            can_finalize: is_hawl_complete,
            price_as_of: threshold.price.as_of,
            price_is_stale: threshold.price.is_stale,
            price_needs_warning: threshold.price.needs_staleness_warning(now, stale_warning_age),
            is_interrupted: record.hawl_interrupted_at.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AssetBreakdown;
    use crate::calendar::HawlPeriod;
    use crate::methodology::Methodology;
    use crate::nisab::{Metal, NisabBasis};
    use crate::pricing::{PriceOrigin, PriceQuote};
    use crate::record::NewRecord;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record() -> NisabYearRecord {
        NisabYearRecord::new_draft(
            NewRecord {
                user_id: Uuid::new_v4(),
                period: HawlPeriod::starting_at(t0()).unwrap(),
                methodology: Methodology::Standard,
                nisab_threshold: dec!(5000),
                total_wealth: dec!(6000),
                liabilities: dec!(0),
                asset_breakdown: AssetBreakdown::default(),
                user_notes: None,
                is_primary: true,
            },
            t0(),
        )
        .unwrap()
    }

    fn summary(wealth: Decimal, liabilities: Decimal) -> WealthSummary {
        WealthSummary {
            user_id: Uuid::nil(),
            total_wealth: wealth,
            near_term_liabilities: liabilities,
            breakdown: AssetBreakdown::default(),
        }
    }

    fn quote(as_of: DateTime<Utc>, is_stale: bool) -> ThresholdQuote {
        ThresholdQuote::from_price(
            NisabBasis::Gold,
            PriceQuote {
                metal: Metal::Gold,
                price_per_gram: dec!(60),
                as_of,
                is_stale,
                source: if is_stale { PriceOrigin::StaleFallback } else { PriceOrigin::Live },
            },
        )
    }

    #[test]
    fn test_midway_projection() {
        let now = t0() + Duration::days(177);
        let view = LiveTrackingView::compute(&record(), &summary(dec!(12000), dec!(2000)), &quote(now, false), now, Duration::days(7)).unwrap();

        assert_eq!(view.current_zakatable_wealth, dec!(10000));
        assert_eq!(view.projected_amount_due, dec!(250));
        assert_eq!(view.current_threshold, dec!(5100));
        assert_eq!(view.days_elapsed, 177);
        assert_eq!(view.days_remaining, 177);
        assert_eq!(view.percent_elapsed, dec!(50));
        assert!(!view.can_finalize);
        assert!(!view.price_needs_warning);
    }

    #[test]
    fn test_complete_and_stale_warning() {
        let now = t0() + Duration::days(360);
        let view = LiveTrackingView::compute(
            &record(),
            &summary(dec!(4000), dec!(0)),
            &quote(now - Duration::days(10), true),
            now,
            Duration::days(7),
        )
        .unwrap();

        assert!(view.is_hawl_complete && view.can_finalize);
        assert_eq!(view.days_remaining, 0);
        assert!(!view.is_above_nisab);
        assert_eq!(view.projected_amount_due, dec!(0));
        assert!(view.price_needs_warning);
    }

    #[test]
    fn test_only_drafts_are_tracked() {
        let mut r = record();
        r.status = RecordStatus::Finalized;
        let res = LiveTrackingView::compute(&r, &summary(dec!(1), dec!(0)), &quote(t0(), false), t0(), Duration::days(7));
        assert_eq!(res.unwrap_err().code(), "INVALID_INPUT");
    }
}
