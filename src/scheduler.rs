//! # Detection Scheduler
//!
//! Periodic sweep over every enrolled user: aggregate wealth, consult the
//! [`HawlTracker`], and apply the verdict through [`RecordLifecycle`].
//!
//! The sweep is driven by an injected [`SweepTrigger`] rather than a global
//! timer, so tests can fire exactly one sweep. Users are processed with bounded
//! concurrency and one user's failure never aborts the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::calendar::HawlPeriod;
use crate::config::TrackerConfig;
use crate::hawl::{HawlTracker, HawlVerdict};
use crate::holdings::{UserDirectory, UserProfile};
use crate::lifecycle::RecordLifecycle;
use crate::methodology::{self, MethodologyInput};
use crate::types::NisabError;

/// A failure isolated to one user during a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSweepError {
    pub user_id: Uuid,
    pub error: NisabError,
}

/// Counters of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub users_scanned: usize,
    pub records_created: usize,
    pub records_interrupted: usize,
    /// Drafts past their completion date, awaiting an explicit finalize.
    pub records_completed: usize,
    /// Extra Drafts beyond the active one, for manual resolution.
    pub unresolved_drafts: Vec<Uuid>,
    pub errors: Vec<UserSweepError>,
}

impl SweepReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Default)]
struct UserOutcome {
    created: bool,
    interrupted: bool,
    completed: bool,
    unresolved_drafts: Vec<Uuid>,
}

/// Source of sweep ticks.
#[async_trait]
pub trait SweepTrigger: Send {
    /// Waits for the next tick. Returns `false` once no further ticks will come.
    async fn tick(&mut self) -> bool;
}

/// Fixed-period trigger. Ticks missed while a sweep is still running are skipped.
pub struct IntervalTrigger {
    interval: Interval,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// Fires every `sweep_interval_secs` of the tracker configuration.
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.sweep_interval())
    }
}

#[async_trait]
impl SweepTrigger for IntervalTrigger {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Manual trigger: every message fires one sweep; dropping all senders ends the loop.
#[async_trait]
impl SweepTrigger for mpsc::Receiver<()> {
    async fn tick(&mut self) -> bool {
        self.recv().await.is_some()
    }
}

/// Clears the in-flight flag when a sweep ends, even on early return.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DetectionScheduler {
    lifecycle: Arc<RecordLifecycle>,
    users: Arc<dyn UserDirectory>,
    tracker: HawlTracker,
    max_concurrent_users: usize,
    in_flight: AtomicBool,
}

impl DetectionScheduler {
    pub fn new(lifecycle: Arc<RecordLifecycle>, users: Arc<dyn UserDirectory>) -> Self {
        let max_concurrent_users = lifecycle.config().max_concurrent_users.max(1);
        Self {
            lifecycle,
            users,
            tracker: HawlTracker::new(),
            max_concurrent_users,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Runs sweeps on every trigger tick until the trigger is exhausted or
    /// `shutdown` flips to `true`.
    pub async fn run<T: SweepTrigger>(&self, mut trigger: T, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(max_concurrent_users = self.max_concurrent_users, "detection scheduler started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                more = trigger.tick() => {
                    if !more {
                        break;
                    }
                    match self.run_once().await {
                        Ok(Some(report)) if !report.is_success() => {
                            tracing::warn!(failed_users = report.errors.len(), "sweep finished with per-user errors");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "sweep aborted"),
                    }
                }
            }
        }
        tracing::info!("detection scheduler stopped");
    }

    /// Performs one sweep.
    ///
    /// Returns `Ok(None)` without doing anything when another sweep is still in
    /// flight. Fails as a whole only if the user list cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<Option<SweepReport>, NisabError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("previous sweep still running; skipping tick");
            return Ok(None);
        }
        let _guard = InFlight(&self.in_flight);

        let started_at = self.lifecycle.now();
        let users = self.users.list_users().await?;

        let outcomes: Vec<(Uuid, Result<UserOutcome, NisabError>)> = stream::iter(users)
            .map(|profile| async move { (profile.user_id, self.sweep_user(&profile).await) })
            .buffer_unordered(self.max_concurrent_users)
            .collect()
            .await;

        let mut report = SweepReport {
            started_at,
            finished_at: started_at,
            users_scanned: outcomes.len(),
            records_created: 0,
            records_interrupted: 0,
            records_completed: 0,
            unresolved_drafts: Vec::new(),
            errors: Vec::new(),
        };

        for (user_id, outcome) in outcomes {
            match outcome {
                Ok(o) => {
                    report.records_created += usize::from(o.created);
                    report.records_interrupted += usize::from(o.interrupted);
                    report.records_completed += usize::from(o.completed);
                    report.unresolved_drafts.extend(o.unresolved_drafts);
                }
                Err(error) => {
                    tracing::warn!(%user_id, error = %error, "user sweep failed");
                    report.errors.push(UserSweepError { user_id, error });
                }
            }
        }
        report.errors.sort_by_key(|e| e.user_id);
        report.unresolved_drafts.sort();
        report.finished_at = self.lifecycle.now();

        tracing::info!(
            users = report.users_scanned,
            created = report.records_created,
            interrupted = report.records_interrupted,
            completed = report.records_completed,
            errors = report.errors.len(),
            "sweep finished"
        );
        Ok(Some(report))
    }

    async fn sweep_user(&self, profile: &UserProfile) -> Result<UserOutcome, NisabError> {
        let user_id = profile.user_id;
        let summary = self.lifecycle.aggregator().aggregate(user_id).await?;
        let records = self.lifecycle.records_for_user(user_id).await?;
        let (active, _) = self.tracker.partition_drafts(&records);

        // An open Draft is judged by its own methodology and locked threshold;
        // a new Hawl by the user's methodology at the cached price.
        let (methodology, quote) = match active {
            Some(record) => (record.methodology, None),
            None => {
                let basis = profile.methodology.nisab_basis();
                (profile.methodology, Some(self.lifecycle.oracle().cached_threshold(basis).await?))
            }
        };
        let threshold = match (&quote, active) {
            (Some(q), _) => q.threshold,
            (None, Some(record)) => record.nisab_threshold,
            (None, None) => Decimal::ZERO,
        };

        let zakatable = methodology::calculate(&MethodologyInput {
            wealth: summary.total_wealth,
            liabilities: summary.near_term_liabilities,
            methodology,
            nisab_threshold: threshold,
        })
        .zakatable_wealth;

        let now = self.lifecycle.now();
        let assessment = self.tracker.assess(now, zakatable, threshold, &records);
        let mut outcome = UserOutcome {
            unresolved_drafts: assessment.unresolved_drafts,
            ..Default::default()
        };

        match assessment.verdict {
            HawlVerdict::Start { hawl_start, .. } => {
                if let Some(quote) = quote {
                    let period = HawlPeriod::starting_at(hawl_start)?;
                    self.lifecycle.create_detected(profile, &summary, &quote, period).await?;
                    outcome.created = true;
                }
            }
            HawlVerdict::Interrupt { record_id, wealth, threshold } => {
                outcome.interrupted = self.lifecycle.flag_interruption(record_id, wealth, threshold).await?;
            }
            HawlVerdict::Complete { record_id } => {
                tracing::info!(%user_id, %record_id, "hawl complete; awaiting finalization");
                outcome.completed = true;
            }
            HawlVerdict::Continue => {}
        }

        Ok(outcome)
    }
}
