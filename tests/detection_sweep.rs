mod common;

use chrono::Duration;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};

use common::Harness;
use zakat_nisab::prelude::*;

#[tokio::test]
async fn test_nisab_reached_opens_exactly_one_record() {
    let h = Harness::new();
    let user = h.enroll(Methodology::Standard);

    // $0: nothing to track yet
    let report = h.sweep().await;
    assert_eq!(report.users_scanned, 1);
    assert_eq!(report.records_created, 0);
    assert!(h.records(user).await.is_empty());

    h.set_cash(user, dec!(5000));
    let report = h.sweep().await;
    assert_eq!(report.records_created, 1);
    assert!(report.is_success());

    let records = h.records(user).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, RecordStatus::Draft);
    assert_eq!(record.hawl_completion_date - record.hawl_start_date, Duration::days(354));
    assert_eq!(record.nisab_threshold, dec!(5000));
    assert_eq!(record.total_wealth, dec!(5000));
    assert!(record.is_primary);
    assert_eq!(
        h.audit_types(user, record.id).await,
        vec![AuditEventType::Created, AuditEventType::NisabAchieved]
    );

    let audit = h.audit(user, record.id).await;
    assert!(audit.iter().all(|e| e.actor == Actor::System));
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let h = Harness::new();
    let user = h.enroll(Methodology::Standard);
    h.set_cash(user, dec!(8000));

    h.sweep().await;
    let record_id = h.records(user).await[0].id;
    let audit_before = h.audit(user, record_id).await;

    let again = h.sweep().await;
    assert_eq!(again.records_created, 0);
    assert_eq!(again.records_interrupted, 0);
    assert_eq!(h.records(user).await.len(), 1);
    assert_eq!(h.audit(user, record_id).await, audit_before);
}

#[tokio::test]
async fn test_wealth_drop_flags_interruption_without_deleting() {
    let h = Harness::new();
    let user = h.enroll(Methodology::Standard);
    h.set_cash(user, dec!(7000));
    h.sweep().await;

    h.advance_days(40);
    h.set_cash(user, dec!(3000));
    let report = h.sweep().await;
    assert_eq!(report.records_interrupted, 1);

    let records = h.records(user).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, RecordStatus::Draft);
    assert_eq!(record.hawl_interrupted_at, Some(h.clock.now()));

    let audit = h.audit(user, record.id).await;
    match &audit.last().unwrap().payload {
        AuditPayload::HawlInterrupted { wealth, threshold, .. } => {
            assert_eq!(*wealth, dec!(3000));
            assert_eq!(*threshold, dec!(5000));
        }
        other => panic!("expected HawlInterrupted, got {other:?}"),
    }

    // Flag is written once; repeated sweeps only re-detect it.
    h.advance_days(1);
    let report = h.sweep().await;
    assert_eq!(report.records_interrupted, 0);
    assert_eq!(h.audit(user, record.id).await.len(), audit.len());
}

#[tokio::test]
async fn test_completed_hawl_is_reported_not_finalized() {
    let h = Harness::new();
    let user = h.enroll(Methodology::Standard);
    h.set_cash(user, dec!(9000));
    h.sweep().await;

    h.advance_days(354);
    let report = h.sweep().await;
    assert_eq!(report.records_completed, 1);
    assert_eq!(h.records(user).await[0].status, RecordStatus::Draft);
}

#[tokio::test]
async fn test_one_failing_user_does_not_abort_sweep() {
    let h = Harness::new();
    let broken = h.enroll(Methodology::Standard);
    let healthy = h.enroll(Methodology::Standard);
    h.set_cash(broken, dec!(9000));
    h.set_cash(healthy, dec!(9000));
    h.holdings.set_unavailable(broken, true);

    let report = h.sweep().await;
    assert_eq!(report.users_scanned, 2);
    assert_eq!(report.records_created, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].user_id, broken);
    assert_eq!(report.errors[0].error.code(), "AGGREGATION_FAILED");

    assert_eq!(h.records(healthy).await.len(), 1);
    assert!(h.records(broken).await.is_empty());
}

#[tokio::test]
async fn test_extra_drafts_are_surfaced_not_merged() {
    let h = Harness::new();
    let user = h.enroll(Methodology::Standard);
    h.set_cash(user, dec!(9000));
    h.sweep().await;

    h.advance_days(5);
    let manual = h.manual_draft(user, dec!(9000), dec!(0)).await;
    assert!(!manual.is_primary);

    let report = h.sweep().await;
    assert_eq!(report.records_created, 0);
    assert_eq!(report.unresolved_drafts, vec![manual.id]);
    assert_eq!(h.records(user).await.len(), 2);
}

#[tokio::test]
async fn test_detection_uses_cached_price_when_source_is_down() {
    let h = Harness::new();
    let user = h.enroll(Methodology::Standard);

    // No price was ever cached: the user is reported, not skipped silently.
    h.prices.set_offline(true);
    h.set_cash(user, dec!(6000));
    let report = h.sweep().await;
    assert_eq!(report.errors[0].error.code(), "PRICE_UNAVAILABLE");

    h.prices.set_offline(false);
    h.lifecycle.oracle().get_price(Metal::Gold).await.unwrap();
    h.prices.set_offline(true);
    h.advance_days(3);

    let report = h.sweep().await;
    assert_eq!(report.records_created, 1);
    let record = &h.records(user).await[0];
    let audit = h.audit(user, record.id).await;
    assert!(matches!(
        audit[1].payload,
        AuditPayload::NisabAchieved { price_is_stale: true, .. }
    ));
}

#[tokio::test]
async fn test_silver_methodology_uses_silver_threshold() {
    let h = Harness::new();
    let user = h.enroll(Methodology::Hanafi);
    // silver at $1/g puts the Nisab at $595
    h.set_cash(user, dec!(600));
    h.sweep().await;

    let record = &h.records(user).await[0];
    assert_eq!(record.nisab_basis, NisabBasis::Silver);
    assert_eq!(record.nisab_threshold, dec!(595));
}

#[tokio::test]
async fn test_run_loop_driven_by_channel_trigger() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let h = Harness::new();
    let user = h.enroll(Methodology::Standard);
    h.set_cash(user, dec!(5000));

    let (tick_tx, tick_rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = h.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run(tick_rx, shutdown_rx).await });

    tick_tx.send(()).await.unwrap();
    drop(tick_tx);
    handle.await.unwrap();

    assert_eq!(h.records(user).await.len(), 1);
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let h = Harness::new();
    let (_tick_tx, tick_rx) = mpsc::channel::<()>(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = h.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run(tick_rx, shutdown_rx).await });

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_interval_trigger_fires_periodically() {
    let mut trigger = IntervalTrigger::new(std::time::Duration::from_secs(3600));
    // first tick completes immediately
    assert!(trigger.tick().await);
    let before = tokio::time::Instant::now();
    assert!(trigger.tick().await);
    assert!(tokio::time::Instant::now() - before >= std::time::Duration::from_secs(3600));
}

#[tokio::test(start_paused = true)]
async fn test_interval_trigger_follows_configured_period() {
    let config = TrackerConfig::builder().sweep_interval_secs(90).build().unwrap();
    let mut trigger = IntervalTrigger::from_config(&config);
    assert!(trigger.tick().await);
    let before = tokio::time::Instant::now();
    assert!(trigger.tick().await);
    let waited = tokio::time::Instant::now() - before;
    assert!(waited >= std::time::Duration::from_secs(90));
    assert!(waited < TrackerConfig::default().sweep_interval());
}

#[tokio::test]
async fn test_primary_flag_moves_to_the_new_hawl() {
    let h = Harness::new();
    let user = h.enroll(Methodology::Standard);
    h.set_cash(user, dec!(9000));
    h.sweep().await;
    let first = h.records(user).await.remove(0);

    h.advance_days(354);
    let finalized = h
        .lifecycle
        .finalize(user, first.id, Some(first.version), FinalizeOptions::default())
        .await
        .unwrap();
    assert!(finalized.is_primary);

    let report = h.sweep().await;
    assert_eq!(report.records_created, 1);
    let records = h.records(user).await;
    assert_eq!(records.len(), 2);
    let primaries: Vec<_> = records.iter().filter(|r| r.is_primary).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].status, RecordStatus::Draft);

    let old = records.iter().find(|r| r.id == first.id).unwrap();
    assert_eq!(old.version, finalized.version + 1);
    assert_eq!(
        h.audit_types(user, first.id).await,
        vec![AuditEventType::Created, AuditEventType::NisabAchieved, AuditEventType::Finalized]
    );

    h.lifecycle.delete(user, primaries[0].id, None).await.unwrap();
    let records = h.records(user).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].is_primary);
    assert_eq!(records[0].version, old.version + 1);
}
