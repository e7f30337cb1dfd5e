//! SQLite-based persistence for records, audit entries and the price cache.
//!
//! # Example
//!
//! ```ignore
//! use zakat_nisab::store::SqliteStore;
//!
//! let store = SqliteStore::connect("sqlite:nisab.db?mode=rwc", cipher).await?;
//! ```
//!
//! Instants are stored as fixed-width RFC 3339 text so lexical order equals
//! chronological order. Decimals are stored as text to keep full precision.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::sealed::{SealedAuditEntry, SealedRecord};
use super::{AuditRepository, PriceCacheRepository, RecordRepository, RecordWrite};
use crate::audit::{AuditEventType, AuditTrailEntry};
use crate::calendar::HijriDate;
use crate::crypto::FieldCipher;
use crate::nisab::{Metal, NisabBasis};
use crate::pricing::{PriceCacheEntry, PriceOrigin};
use crate::record::{NisabYearRecord, RecordStatus};
use crate::types::NisabError;

const RECORD_COLUMNS: &str = "id, user_id, hawl_start_date, hawl_start_date_hijri, hawl_completion_date, \
     hawl_completion_date_hijri, nisab_basis, nisab_threshold, status, finalized_at, hawl_interrupted_at, \
     is_primary, created_at, updated_at, version, financials";

/// A SQLite-backed implementation of every repository trait.
pub struct SqliteStore {
    pool: SqlitePool,
    cipher: Arc<dyn FieldCipher>,
}

impl SqliteStore {
    /// Connects to a SQLite database and ensures the schema is initialized.
    ///
    /// # Arguments
    /// * `url` - SQLite connection URL (e.g., `"sqlite:nisab.db?mode=rwc"`)
    pub async fn connect(url: &str, cipher: Arc<dyn FieldCipher>) -> Result<Self, NisabError> {
        // An in-memory database exists per connection, so it must not be pooled wider.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| db_error("connection", e))?;

        let store = Self { pool, cipher };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Wraps an existing pool. Does NOT run migrations.
    pub fn from_pool(pool: SqlitePool, cipher: Arc<dyn FieldCipher>) -> Self {
        Self { pool, cipher }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), NisabError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS nisab_records (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                hawl_start_date TEXT NOT NULL,
                hawl_start_date_hijri TEXT NOT NULL,
                hawl_completion_date TEXT NOT NULL,
                hawl_completion_date_hijri TEXT NOT NULL,
                nisab_basis TEXT NOT NULL,
                nisab_threshold TEXT NOT NULL,
                status TEXT NOT NULL,
                finalized_at TEXT,
                hawl_interrupted_at TEXT,
                is_primary INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL,
                financials TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_nisab_records_user ON nisab_records (user_id, hawl_start_date)",
            r#"
            CREATE TABLE IF NOT EXISTS audit_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                record_id TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_audit_entries_record ON audit_entries (record_id, seq)",
            r#"
            CREATE TABLE IF NOT EXISTS price_cache (
                metal TEXT PRIMARY KEY NOT NULL,
                price_per_gram TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                source TEXT NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("migration", e))?;
        }
        Ok(())
    }

    async fn insert_record_row(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NisabYearRecord,
    ) -> Result<(), NisabError> {
        let row = SealedRecord::seal(record, self.cipher.as_ref())?;
        sqlx::query(&format!(
            "INSERT INTO nisab_records ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RECORD_COLUMNS
        ))
        .bind(row.id.to_string())
        .bind(row.user_id.to_string())
        .bind(ts(row.hawl_start_date))
        .bind(json(&row.hawl_start_date_hijri)?)
        .bind(ts(row.hawl_completion_date))
        .bind(json(&row.hawl_completion_date_hijri)?)
        .bind(row.nisab_basis.to_string())
        .bind(row.nisab_threshold.to_string())
        .bind(row.status.to_string())
        .bind(row.finalized_at.map(ts))
        .bind(row.hawl_interrupted_at.map(ts))
        .bind(row.is_primary)
        .bind(ts(row.created_at))
        .bind(ts(row.updated_at))
        .bind(row.version as i64)
        .bind(&row.financials)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("record insert", e))?;
        Ok(())
    }

    async fn update_record_row(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NisabYearRecord,
        expected_version: u64,
    ) -> Result<(), NisabError> {
        let row = SealedRecord::seal(record, self.cipher.as_ref())?;
        let result = sqlx::query(
            r#"
            UPDATE nisab_records
            SET status = ?, finalized_at = ?, hawl_interrupted_at = ?, is_primary = ?,
                updated_at = ?, version = ?, financials = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(row.status.to_string())
        .bind(row.finalized_at.map(ts))
        .bind(row.hawl_interrupted_at.map(ts))
        .bind(row.is_primary)
        .bind(ts(row.updated_at))
        .bind(row.version as i64)
        .bind(&row.financials)
        .bind(row.id.to_string())
        .bind(expected_version as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("record update", e))?;

        if result.rows_affected() == 0 {
            return Err(Self::conflict_error(tx, record.id, expected_version).await);
        }
        Ok(())
    }

    async fn delete_draft_row(
        tx: &mut Transaction<'_, Sqlite>,
        record_id: Uuid,
        expected_version: u64,
    ) -> Result<(), NisabError> {
        let result = sqlx::query("DELETE FROM nisab_records WHERE id = ? AND version = ? AND status = ?")
            .bind(record_id.to_string())
            .bind(expected_version as i64)
            .bind(RecordStatus::Draft.to_string())
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error("record delete", e))?;

        if result.rows_affected() == 0 {
            return Err(Self::conflict_error(tx, record_id, expected_version).await);
        }

        sqlx::query("DELETE FROM audit_entries WHERE record_id = ?")
            .bind(record_id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error("audit cascade", e))?;
        Ok(())
    }

    async fn insert_audit_rows(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        audit: &[AuditTrailEntry],
    ) -> Result<(), NisabError> {
        for entry in audit {
            let row = SealedAuditEntry::seal(entry, self.cipher.as_ref())?;
            sqlx::query(
                r#"
                INSERT INTO audit_entries (id, record_id, actor_id, event_type, timestamp, payload)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id.to_string())
            .bind(row.record_id.to_string())
            .bind(row.actor_id.to_string())
            .bind(row.event_type.to_string())
            .bind(ts(row.timestamp))
            .bind(&row.payload)
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error("audit insert", e))?;
        }
        Ok(())
    }

    /// Explains why a versioned write matched no row.
    async fn conflict_error(
        tx: &mut Transaction<'_, Sqlite>,
        record_id: Uuid,
        expected_version: u64,
    ) -> NisabError {
        let row = sqlx::query("SELECT version, status FROM nisab_records WHERE id = ?")
            .bind(record_id.to_string())
            .fetch_optional(&mut **tx)
            .await;

        match row {
            Ok(Some(row)) => {
                let actual_version = row.get::<i64, _>("version") as u64;
                if actual_version != expected_version {
                    return NisabError::ConcurrentModification { record_id, expected_version, actual_version };
                }
                let status: String = row.get("status");
                match RecordStatus::from_str(&status) {
                    Ok(status) => NisabError::DeleteForbidden { record_id, status },
                    Err(e) => parse_error("status", &status, e),
                }
            }
            Ok(None) => NisabError::RecordNotFound { record_id },
            Err(e) => db_error("version check", e),
        }
    }
}

#[async_trait]
impl RecordRepository for SqliteStore {
    async fn commit(&self, writes: &[RecordWrite<'_>], audit: &[AuditTrailEntry]) -> Result<(), NisabError> {
        // Dropping `tx` on an early return rolls the whole batch back.
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;

        for write in writes {
            match *write {
                RecordWrite::Insert(record) => self.insert_record_row(&mut tx, record).await?,
                RecordWrite::Update { record, expected_version } => {
                    self.update_record_row(&mut tx, record, expected_version).await?
                }
                RecordWrite::DeleteDraft { record_id, expected_version } => {
                    Self::delete_draft_row(&mut tx, record_id, expected_version).await?
                }
            }
        }

        self.insert_audit_rows(&mut tx, audit).await?;
        tx.commit().await.map_err(|e| db_error("commit", e))
    }

    async fn get(&self, record_id: Uuid) -> Result<Option<NisabYearRecord>, NisabError> {
        let row = sqlx::query(&format!("SELECT {} FROM nisab_records WHERE id = ?", RECORD_COLUMNS))
            .bind(record_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("record query", e))?;

        row.map(|r| record_from_row(&r)?.open(self.cipher.as_ref())).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<NisabYearRecord>, NisabError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM nisab_records WHERE user_id = ? ORDER BY hawl_start_date ASC, created_at ASC, id ASC",
            RECORD_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("record query", e))?;

        rows.iter()
            .map(|r| record_from_row(r)?.open(self.cipher.as_ref()))
            .collect()
    }

}

#[async_trait]
impl AuditRepository for SqliteStore {
    async fn append(&self, entry: &AuditTrailEntry) -> Result<(), NisabError> {
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;

        let exists = sqlx::query("SELECT 1 FROM nisab_records WHERE id = ?")
            .bind(entry.record_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("record query", e))?;
        if exists.is_none() {
            return Err(NisabError::RecordNotFound { record_id: entry.record_id });
        }

        self.insert_audit_rows(&mut tx, std::slice::from_ref(entry)).await?;
        tx.commit().await.map_err(|e| db_error("commit", e))
    }

    async fn list_for(&self, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, NisabError> {
        let rows = sqlx::query(
            r#"
            SELECT id, record_id, actor_id, event_type, timestamp, payload
            FROM audit_entries
            WHERE record_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(record_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("audit query", e))?;

        rows.iter()
            .map(|r| audit_from_row(r)?.open(self.cipher.as_ref()))
            .collect()
    }

    async fn latest_timestamp(&self, record_id: Uuid) -> Result<Option<DateTime<Utc>>, NisabError> {
        let latest: Option<String> = sqlx::query_scalar("SELECT MAX(timestamp) FROM audit_entries WHERE record_id = ?")
            .bind(record_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("audit query", e))?;

        latest.map(|s| parse_ts("timestamp", &s)).transpose()
    }
}

#[async_trait]
impl PriceCacheRepository for SqliteStore {
    async fn record_price(&self, entry: &PriceCacheEntry) -> Result<(), NisabError> {
        sqlx::query(
            r#"
            INSERT INTO price_cache (metal, price_per_gram, fetched_at, expires_at, source)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(metal) DO UPDATE SET
                price_per_gram = excluded.price_per_gram,
                fetched_at = excluded.fetched_at,
                expires_at = excluded.expires_at,
                source = excluded.source
            "#,
        )
        .bind(entry.metal.to_string())
        .bind(entry.price_per_gram.to_string())
        .bind(ts(entry.fetched_at))
        .bind(ts(entry.expires_at))
        .bind(entry.source.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("price upsert", e))?;
        Ok(())
    }

    async fn latest_price(&self, metal: Metal) -> Result<Option<PriceCacheEntry>, NisabError> {
        let row = sqlx::query(
            "SELECT metal, price_per_gram, fetched_at, expires_at, source FROM price_cache WHERE metal = ?",
        )
        .bind(metal.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("price query", e))?;

        row.map(|r| {
            let price: String = r.get("price_per_gram");
            let fetched_at: String = r.get("fetched_at");
            let expires_at: String = r.get("expires_at");
            let source: String = r.get("source");
            Ok(PriceCacheEntry {
                metal,
                price_per_gram: parse_decimal("price_per_gram", &price)?,
                fetched_at: parse_ts("fetched_at", &fetched_at)?,
                expires_at: parse_ts("expires_at", &expires_at)?,
                source: PriceOrigin::from_str(&source).map_err(|e| parse_error("source", &source, e))?,
            })
        })
        .transpose()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<SealedRecord, NisabError> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let start: String = row.get("hawl_start_date");
    let start_hijri: String = row.get("hawl_start_date_hijri");
    let completion: String = row.get("hawl_completion_date");
    let completion_hijri: String = row.get("hawl_completion_date_hijri");
    let basis: String = row.get("nisab_basis");
    let threshold: String = row.get("nisab_threshold");
    let status: String = row.get("status");
    let finalized_at: Option<String> = row.get("finalized_at");
    let interrupted_at: Option<String> = row.get("hawl_interrupted_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(SealedRecord {
        id: parse_uuid("id", &id)?,
        user_id: parse_uuid("user_id", &user_id)?,
        hawl_start_date: parse_ts("hawl_start_date", &start)?,
        hawl_start_date_hijri: parse_hijri("hawl_start_date_hijri", &start_hijri)?,
        hawl_completion_date: parse_ts("hawl_completion_date", &completion)?,
        hawl_completion_date_hijri: parse_hijri("hawl_completion_date_hijri", &completion_hijri)?,
        nisab_basis: NisabBasis::from_str(&basis).map_err(|e| parse_error("nisab_basis", &basis, e))?,
        nisab_threshold: parse_decimal("nisab_threshold", &threshold)?,
        status: RecordStatus::from_str(&status).map_err(|e| parse_error("status", &status, e))?,
        finalized_at: finalized_at.map(|s| parse_ts("finalized_at", &s)).transpose()?,
        hawl_interrupted_at: interrupted_at.map(|s| parse_ts("hawl_interrupted_at", &s)).transpose()?,
        is_primary: row.get("is_primary"),
        created_at: parse_ts("created_at", &created_at)?,
        updated_at: parse_ts("updated_at", &updated_at)?,
        version: row.get::<i64, _>("version") as u64,
        financials: row.get("financials"),
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<SealedAuditEntry, NisabError> {
    let id: String = row.get("id");
    let record_id: String = row.get("record_id");
    let actor_id: String = row.get("actor_id");
    let event_type: String = row.get("event_type");
    let timestamp: String = row.get("timestamp");

    Ok(SealedAuditEntry {
        id: parse_uuid("id", &id)?,
        record_id: parse_uuid("record_id", &record_id)?,
        actor_id: parse_uuid("actor_id", &actor_id)?,
        event_type: AuditEventType::from_str(&event_type).map_err(|e| parse_error("event_type", &event_type, e))?,
        timestamp: parse_ts("timestamp", &timestamp)?,
        payload: row.get("payload"),
    })
}

fn ts(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn json<T: serde::Serialize>(value: &T) -> Result<String, NisabError> {
    serde_json::to_string(value).map_err(|e| NisabError::storage(format!("serialize error: {}", e)))
}

fn parse_ts(field: &str, value: &str) -> Result<DateTime<Utc>, NisabError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| parse_error(field, value, e))
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, NisabError> {
    Uuid::parse_str(value).map_err(|e| parse_error(field, value, e))
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, NisabError> {
    Decimal::from_str_exact(value).map_err(|e| parse_error(field, value, e))
}

fn parse_hijri(field: &str, value: &str) -> Result<HijriDate, NisabError> {
    serde_json::from_str(value).map_err(|e| parse_error(field, value, e))
}

fn parse_error(field: &str, value: &str, error: impl std::fmt::Display) -> NisabError {
    NisabError::storage(format!("corrupt column {} ({:?}): {}", field, value, error))
}

fn db_error(context: &str, error: sqlx::Error) -> NisabError {
    NisabError::storage(format!("SQLite {} error: {}", context, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AssetBreakdown;
    use crate::audit::AuditPayload;
    use crate::calendar::HawlPeriod;
    use crate::crypto::AesGcmCipher;
    use crate::methodology::Methodology;
    use crate::record::NewRecord;
    use crate::types::Actor;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", Arc::new(AesGcmCipher::ephemeral()))
            .await
            .unwrap()
    }

    fn record(start: DateTime<Utc>) -> NisabYearRecord {
        NisabYearRecord::new_draft(
            NewRecord {
                user_id: Uuid::nil(),
                period: HawlPeriod::starting_at(start).unwrap(),
                methodology: Methodology::Maliki,
                nisab_threshold: dec!(5525),
                total_wealth: dec!(8000.50),
                liabilities: dec!(500),
                asset_breakdown: AssetBreakdown::default(),
                user_notes: Some("savings".to_string()),
                is_primary: true,
            },
            start,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_record_roundtrip() {
        let store = store().await;
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let r = record(start);
        let entry = AuditTrailEntry::stamp(
            r.id,
            Actor::System,
            AuditPayload::HawlInterrupted { wealth: dec!(4999.99), threshold: dec!(5525), detected_at: start },
            start,
            None,
        );

        store.insert(&r, std::slice::from_ref(&entry)).await.unwrap();
        assert_eq!(store.get(r.id).await.unwrap().unwrap(), r);
        assert_eq!(store.list_for(r.id).await.unwrap(), vec![entry]);
        assert_eq!(store.latest_timestamp(r.id).await.unwrap(), Some(start));
    }

    #[tokio::test]
    async fn test_sqlite_optimistic_update() {
        let store = store().await;
        let mut r = record(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        store.insert(&r, &[]).await.unwrap();

        r.version = 1;
        store.update(&r, 0, &[]).await.unwrap();
        let err = store.update(&r, 0, &[]).await.unwrap_err();
        assert_eq!(err.code(), "CONCURRENT_MODIFICATION");
    }

    #[tokio::test]
    async fn test_sqlite_delete_only_drafts() {
        let store = store().await;
        let mut r = record(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        store.insert(&r, &[]).await.unwrap();

        r.status = RecordStatus::Finalized;
        r.version = 1;
        store.update(&r, 0, &[]).await.unwrap();

        let err = store.delete_draft(r.id, 1).await.unwrap_err();
        assert_eq!(err, NisabError::DeleteForbidden { record_id: r.id, status: RecordStatus::Finalized });
    }

    #[tokio::test]
    async fn test_sqlite_price_cache_upsert() {
        let store = store().await;
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        store
            .record_price(&PriceCacheEntry::live(Metal::Gold, dec!(65), t, Duration::hours(24)))
            .await
            .unwrap();
        store
            .record_price(&PriceCacheEntry::live(Metal::Gold, dec!(66.25), t + Duration::hours(25), Duration::hours(24)))
            .await
            .unwrap();

        let latest = store.latest_price(Metal::Gold).await.unwrap().unwrap();
        assert_eq!(latest.price_per_gram, dec!(66.25));
        assert!(store.latest_price(Metal::Silver).await.unwrap().is_none());
    }
}
