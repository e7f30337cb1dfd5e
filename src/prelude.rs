//! Prelude module for zakat-nisab
//!
//! Re-exports the types most callers need.
//!
//! # Usage
//!
//! ```rust
//! use zakat_nisab::prelude::*;
//! ```

// Core exports
pub use crate::audit::{AuditEventType, AuditPayload, AuditTrailEntry, PriceEvidence, RecordOrigin};
pub use crate::builder::{Builder, Validate};
pub use crate::calendar::{HAWL_DAYS, HawlPeriod, HijriDate};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::TrackerConfig;
pub use crate::crypto::{AesGcmCipher, FieldCipher};
pub use crate::hawl::{HawlAssessment, HawlTracker, HawlVerdict};
pub use crate::inputs::IntoMoney;
pub use crate::methodology::{Methodology, MethodologyInput, MethodologyResult, ZAKAT_RATE};
pub use crate::nisab::{Metal, NisabBasis};
pub use crate::pricing::{PriceCacheEntry, PriceOrigin, PriceQuote, ThresholdQuote};
pub use crate::record::{NisabYearRecord, RecordEdit, RecordFilter, RecordSnapshot, RecordStatus};
pub use crate::tracking::LiveTrackingView;
pub use crate::types::{Actor, AssetCategory, NisabError};

// Async services
#[cfg(feature = "async")]
pub use crate::aggregator::WealthAggregator;
#[cfg(feature = "async")]
pub use crate::audit::AuditTrail;
#[cfg(feature = "async")]
pub use crate::holdings::{AssetHolding, HoldingsSource, StaticHoldings, UserDirectory, UserHoldings, UserProfile};
#[cfg(feature = "async")]
pub use crate::lifecycle::{CreateRecord, FinalizeOptions, RecordDetail, RecordLifecycle};
#[cfg(feature = "async")]
pub use crate::pricing::{PriceOracle, PriceSource, StaticPriceSource};
#[cfg(feature = "async")]
pub use crate::scheduler::{DetectionScheduler, IntervalTrigger, SweepReport, SweepTrigger, UserSweepError};
#[cfg(feature = "async")]
pub use crate::store::{AuditRepository, MemoryStore, PriceCacheRepository, RecordRepository, TrackerStore};

#[cfg(feature = "live-pricing")]
pub use crate::pricing::{HttpPriceSource, NetworkConfig};
#[cfg(feature = "sqlite")]
pub use crate::store::SqliteStore;
