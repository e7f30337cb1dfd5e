use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use zakat_nisab::prelude::*;

#[test]
fn test_error_serializes_with_code_tag() {
    let err = NisabError::PrematureFinalization { record_id: Uuid::nil(), days_remaining: 12 };
    let json = serde_json::to_string(&err).unwrap();

    println!("Serialized JSON: {}", json);

    assert!(json.contains(r#""code":"PREMATURE_FINALIZATION""#));
    assert!(json.contains(r#""days_remaining":12"#));
    assert_eq!(err.to_string(), format!("Hawl for record {} is not complete: 12 day(s) remaining", Uuid::nil()));

    let back: NisabError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
}

#[test]
fn test_error_classification() {
    let locked = NisabError::RecordLocked { record_id: Uuid::nil() };
    assert!(locked.is_user_error());
    assert!(!locked.is_retryable());

    let storage = NisabError::Storage { message: "disk full".to_string() };
    assert!(!storage.is_user_error());

    let price = NisabError::PriceUnavailable { metal: Metal::Silver };
    assert!(price.is_user_error() && price.is_retryable());
    assert!(serde_json::to_string(&price).unwrap().contains(r#""metal":"silver""#));
}

#[test]
fn test_audit_entry_json_shape() {
    let entry = AuditTrailEntry {
        id: Uuid::nil(),
        record_id: Uuid::nil(),
        actor: Actor::System,
        event_type: AuditEventType::NisabAchieved,
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        payload: AuditPayload::NisabAchieved {
            wealth: dec!(5000),
            threshold: dec!(5000),
            basis: NisabBasis::Gold,
            price_is_stale: false,
        },
    };
    let json = serde_json::to_value(&entry).unwrap();

    assert_eq!(json["eventType"], "NISAB_ACHIEVED");
    assert_eq!(json["actor"]["kind"], "system");
    assert_eq!(json["payload"]["event"], "NISAB_ACHIEVED");
    assert_eq!(json["payload"]["data"]["priceIsStale"], false);
    assert_eq!(json["payload"]["data"]["basis"], "gold");
}

#[test]
fn test_status_and_methodology_strings() {
    assert_eq!(serde_json::to_string(&RecordStatus::Unlocked).unwrap(), r#""UNLOCKED""#);
    assert_eq!("FINALIZED".parse::<RecordStatus>().unwrap(), RecordStatus::Finalized);
    assert_eq!(serde_json::to_string(&Methodology::Hanbali).unwrap(), r#""hanbali""#);
    assert_eq!(AuditEventType::HawlInterrupted.to_string(), "HAWL_INTERRUPTED");
}

#[test]
fn test_record_schema_is_generated() {
    let schema = schemars::schema_for!(NisabYearRecord);
    let json = serde_json::to_string(&schema).unwrap();
    assert!(json.contains("hawlCompletionDate"));
    assert!(json.contains("nisabThreshold"));
}
