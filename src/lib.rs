//! # zakat-nisab
//!
//! Tracks Nisab Year Records: one Hawl (lunar year) of wealth above the Nisab
//! threshold per record, from automatic detection through finalization, with an
//! append-only audit trail of every change.
//!
//! The pure core (`nisab`, `methodology`, `calendar`, `record`, `hawl`,
//! `tracking`) has no I/O. The `async` feature (default) adds the services that
//! talk to collaborators: the price oracle, the wealth aggregator, the record
//! lifecycle, and the detection scheduler.

pub mod aggregator;
pub mod audit;
pub mod builder;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod hawl;
pub mod inputs;
pub mod methodology;
pub mod nisab;
pub mod prelude;
pub mod pricing;
pub mod record;
pub mod tracking;
pub mod types;

#[cfg(feature = "async")]
pub mod holdings;
#[cfg(feature = "async")]
pub mod lifecycle;
#[cfg(feature = "async")]
pub mod scheduler;
#[cfg(feature = "async")]
pub mod store;

pub use config::TrackerConfig;
pub use record::{NisabYearRecord, RecordStatus};
pub use types::NisabError;

#[cfg(feature = "async")]
pub use lifecycle::RecordLifecycle;
#[cfg(feature = "async")]
pub use scheduler::DetectionScheduler;
