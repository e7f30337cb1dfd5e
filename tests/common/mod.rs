#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use zakat_nisab::prelude::*;

/// Gold price per gram that puts the gold Nisab at exactly $5,000.
pub fn gold_price_for_5000() -> Decimal {
    dec!(5000) / dec!(85)
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub prices: Arc<StaticPriceSource>,
    pub holdings: Arc<StaticHoldings>,
    pub lifecycle: Arc<RecordLifecycle>,
    pub scheduler: Arc<DetectionScheduler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryStore::ephemeral());
        let prices = Arc::new(StaticPriceSource::new(gold_price_for_5000(), dec!(1)));
        let holdings = Arc::new(StaticHoldings::new());

        let lifecycle = Arc::new(RecordLifecycle::with_store(
            store.clone(),
            prices.clone(),
            holdings.clone(),
            clock.clone(),
            config,
        ));
        let scheduler = Arc::new(DetectionScheduler::new(lifecycle.clone(), holdings.clone()));

        Self { clock, store, prices, holdings, lifecycle, scheduler }
    }

    pub fn enroll(&self, methodology: Methodology) -> Uuid {
        let user_id = Uuid::new_v4();
        self.holdings.register_user(user_id, methodology);
        user_id
    }

    pub fn set_cash(&self, user_id: Uuid, amount: Decimal) {
        self.holdings.set_cash(user_id, amount).unwrap();
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    pub async fn sweep(&self) -> SweepReport {
        self.scheduler.run_once().await.unwrap().expect("no sweep in flight")
    }

    pub async fn records(&self, user_id: Uuid) -> Vec<NisabYearRecord> {
        self.lifecycle.list_records(user_id, &RecordFilter::default()).await.unwrap()
    }

    pub async fn audit(&self, user_id: Uuid, record_id: Uuid) -> Vec<AuditTrailEntry> {
        self.lifecycle.audit_trail(user_id, record_id).await.unwrap()
    }

    pub async fn audit_types(&self, user_id: Uuid, record_id: Uuid) -> Vec<AuditEventType> {
        self.audit(user_id, record_id).await.into_iter().map(|e| e.event_type).collect()
    }

    /// A user-created Standard Draft with explicit figures.
    pub async fn manual_draft(&self, user_id: Uuid, wealth: Decimal, liabilities: Decimal) -> NisabYearRecord {
        self.lifecycle
            .create(
                user_id,
                CreateRecord {
                    methodology: Some(Methodology::Standard),
                    total_wealth: Some(wealth),
                    total_liabilities: Some(liabilities),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }
}
