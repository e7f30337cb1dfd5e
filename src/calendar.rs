//! # Hawl Calendar
//!
//! A Hawl is one lunar year, counted here as a fixed 354 days. Period bounds are
//! stored as UTC instants alongside their Islamic civil (tabular Hijri) date.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use icu_calendar::{Date, islamic::IslamicCivil};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::NisabError;

/// Length of one Hawl in days.
pub const HAWL_DAYS: i64 = 354;

/// A date in the Islamic civil calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema)]
pub struct HijriDate {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl HijriDate {
    pub fn from_gregorian(date: NaiveDate) -> Result<Self, NisabError> {
        let iso = Date::try_new_iso_date(date.year(), date.month() as u8, date.day() as u8)
            .map_err(|e| NisabError::invalid_input("date", format!("cannot convert {date}: {e}")))?;
        let hijri = iso.to_calendar(IslamicCivil::new());

        Ok(Self {
            year: hijri.year().number,
            month: hijri.month().ordinal as u8,
            day: hijri.day_of_month().0 as u8,
        })
    }

    pub fn from_instant(instant: DateTime<Utc>) -> Result<Self, NisabError> {
        Self::from_gregorian(instant.date_naive())
    }
}

impl std::fmt::Display for HijriDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02} AH", self.year, self.month, self.day)
    }
}

/// Start and completion instants of one Hawl, each with its Hijri date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HawlPeriod {
    pub start: DateTime<Utc>,
    pub start_hijri: HijriDate,
    pub completion: DateTime<Utc>,
    pub completion_hijri: HijriDate,
}

impl HawlPeriod {
    pub fn starting_at(start: DateTime<Utc>) -> Result<Self, NisabError> {
        let completion = hawl_completion(start);
        Ok(Self {
            start,
            start_hijri: HijriDate::from_instant(start)?,
            completion,
            completion_hijri: HijriDate::from_instant(completion)?,
        })
    }
}

pub fn hawl_completion(start: DateTime<Utc>) -> DateTime<Utc> {
    start + Duration::days(HAWL_DAYS)
}

/// Whole days elapsed since `start`; zero before the start.
pub fn days_elapsed(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_days().max(0)
}

/// Days left until `completion`, rounded up so a partial day still counts; zero once reached.
pub fn days_remaining(completion: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    if now >= completion {
        return 0;
    }
    let remaining = completion - now;
    let whole = remaining.num_days();
    if remaining > Duration::days(whole) { whole + 1 } else { whole }
}

/// Percentage (0-100, two decimals) of the period between `start` and `completion` that has elapsed.
pub fn percent_elapsed(start: DateTime<Utc>, completion: DateTime<Utc>, now: DateTime<Utc>) -> Decimal {
    let total = (completion - start).num_seconds();
    if total <= 0 || now >= completion {
        return dec!(100);
    }
    let elapsed = (now - start).num_seconds().max(0);
    let pct = Decimal::from(elapsed) * dec!(100) / Decimal::from(total);
    pct.round_dp(2).min(dec!(100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_completion_is_354_days_later() {
        let start = at(2024, 1, 1);
        assert_eq!((hawl_completion(start) - start).num_days(), 354);
    }

    #[test]
    fn test_hijri_conversion() {
        // Mid-Ramadan 1444
        let h = HijriDate::from_gregorian(NaiveDate::from_ymd_opt(2023, 3, 30).unwrap()).unwrap();
        assert_eq!(h.year, 1444);
        assert_eq!(h.month, 9);
    }

    #[test]
    fn test_period_hijri_dates_advance_one_year() {
        let period = HawlPeriod::starting_at(at(2023, 3, 23)).unwrap();
        assert!(period.start < period.completion);
        assert!(period.completion_hijri > period.start_hijri);
        assert_eq!(period.completion_hijri.year - period.start_hijri.year, 1);
    }

    #[test]
    fn test_days_remaining_rounds_partial_days_up() {
        let completion = at(2024, 1, 11);
        assert_eq!(days_remaining(completion, at(2024, 1, 1)), 10);
        assert_eq!(days_remaining(completion, at(2024, 1, 10) + Duration::hours(1)), 1);
        assert_eq!(days_remaining(completion, completion), 0);
        assert_eq!(days_remaining(completion, at(2024, 2, 1)), 0);
    }

    #[test]
    fn test_percent_elapsed() {
        let start = at(2024, 1, 1);
        let completion = hawl_completion(start);
        assert_eq!(percent_elapsed(start, completion, start), dec!(0));
        assert_eq!(percent_elapsed(start, completion, start + Duration::days(177)), dec!(50));
        assert_eq!(percent_elapsed(start, completion, completion + Duration::days(3)), dec!(100));
    }
}
