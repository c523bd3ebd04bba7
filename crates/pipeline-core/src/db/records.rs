//! Durable store for opportunities, analyses and decisions, including the
//! rolling-window dedup used by the admission gate.
//!
//! Dedup is a single conditional write: a claim on `(symbol, kind)` succeeds
//! only if the previous claim is older than the window. Readers that only need
//! to know whether work would be redundant use [`RecordStore::latest_since`].

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Kind of stored unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Opportunity,
    Analysis,
    Decision,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Opportunity => "opportunity",
            RecordKind::Analysis => "analysis",
            RecordKind::Decision => "decision",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "opportunity" => Some(RecordKind::Opportunity),
            "analysis" => Some(RecordKind::Analysis),
            "decision" => Some(RecordKind::Decision),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored unit of work with its JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub kind: RecordKind,
    pub symbol: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn new(
        kind: RecordKind,
        symbol: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            symbol: symbol.into(),
            payload,
            created_at,
        }
    }
}

/// Storage backend for pipeline records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Most recent record of `kind` for `symbol` with `created_at >= since`.
    async fn latest_since(
        &self,
        kind: RecordKind,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredRecord>>;

    /// Unconditional insert.
    async fn insert(&self, record: &StoredRecord) -> Result<()>;

    /// Insert only if no record of the same kind and symbol exists within
    /// `window` before `record.created_at`. Atomic. Returns whether the record
    /// was stored.
    async fn insert_if_absent(&self, record: &StoredRecord, window: Duration) -> Result<bool>;
}

/// In-memory store for tests and database-less runs.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<(RecordKind, String), Vec<StoredRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of a kind for a symbol, oldest first.
    pub fn records_for(&self, kind: RecordKind, symbol: &str) -> Vec<StoredRecord> {
        self.records
            .get(&(kind, symbol.to_string()))
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn latest_since(
        &self,
        kind: RecordKind,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredRecord>> {
        Ok(self.records.get(&(kind, symbol.to_string())).and_then(|records| {
            records
                .iter()
                .filter(|r| r.created_at >= since)
                .max_by_key(|r| r.created_at)
                .cloned()
        }))
    }

    async fn insert(&self, record: &StoredRecord) -> Result<()> {
        self.records
            .entry((record.kind, record.symbol.clone()))
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn insert_if_absent(&self, record: &StoredRecord, window: Duration) -> Result<bool> {
        // The entry guard holds the shard lock, so check and insert are atomic.
        let mut entry = self
            .records
            .entry((record.kind, record.symbol.clone()))
            .or_default();
        let since = record.created_at - window;
        if entry.iter().any(|r| r.created_at >= since) {
            return Ok(false);
        }
        entry.push(record.clone());
        Ok(true)
    }
}

/// PostgreSQL-backed store.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(r: &sqlx::postgres::PgRow) -> Result<StoredRecord> {
        let kind: String = r.get("kind");
        let kind = RecordKind::from_db(&kind)
            .ok_or_else(|| Error::InvalidRecord(format!("unknown record kind {}", kind)))?;
        Ok(StoredRecord {
            id: r.get("id"),
            kind,
            symbol: r.get("symbol"),
            payload: r.get("payload"),
            created_at: r.get("created_at"),
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn latest_since(
        &self,
        kind: RecordKind,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, symbol, payload, created_at
            FROM pipeline_records
            WHERE kind = $1 AND symbol = $2 AND created_at >= $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .bind(symbol)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn insert(&self, record: &StoredRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_records (id, kind, symbol, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.kind.as_str())
        .bind(&record.symbol)
        .bind(&record.payload)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        // Keep the window row in step so later claims see this record.
        sqlx::query(
            r#"
            INSERT INTO dedup_windows (symbol, kind, last_record_id, last_emitted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (symbol, kind) DO UPDATE
                SET last_record_id = EXCLUDED.last_record_id,
                    last_emitted_at = EXCLUDED.last_emitted_at
                WHERE dedup_windows.last_emitted_at < EXCLUDED.last_emitted_at
            "#,
        )
        .bind(&record.symbol)
        .bind(record.kind.as_str())
        .bind(record.id)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(record_id = %record.id, kind = %record.kind, symbol = %record.symbol, "Inserted pipeline record");
        Ok(())
    }

    async fn insert_if_absent(&self, record: &StoredRecord, window: Duration) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Unique key (symbol, kind): the upsert only overwrites a claim that
        // has aged out of the window, so concurrent claimants serialize on the
        // row and at most one of them gets a row back.
        let claimed = sqlx::query(
            r#"
            INSERT INTO dedup_windows (symbol, kind, last_record_id, last_emitted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (symbol, kind) DO UPDATE
                SET last_record_id = EXCLUDED.last_record_id,
                    last_emitted_at = EXCLUDED.last_emitted_at
                WHERE dedup_windows.last_emitted_at < EXCLUDED.last_emitted_at - make_interval(secs => $5)
            RETURNING symbol
            "#,
        )
        .bind(&record.symbol)
        .bind(record.kind.as_str())
        .bind(record.id)
        .bind(record.created_at)
        .bind(window.num_seconds() as f64)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();

        if !claimed {
            tx.rollback().await?;
            debug!(kind = %record.kind, symbol = %record.symbol, "Dedup window still open, record not stored");
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO pipeline_records (id, kind, symbol, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.kind.as_str())
        .bind(&record.symbol)
        .bind(&record.payload)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: RecordKind, symbol: &str, at: DateTime<Utc>) -> StoredRecord {
        StoredRecord::new(kind, symbol, json!({}), at)
    }

    #[tokio::test]
    async fn test_latest_since_filters_by_time_and_kind() {
        let store = MemoryRecordStore::new();
        let t0 = Utc::now();
        store.insert(&record(RecordKind::Analysis, "BTCUSDT", t0)).await.unwrap();
        store
            .insert(&record(RecordKind::Decision, "BTCUSDT", t0 + Duration::hours(1)))
            .await
            .unwrap();

        let found = store
            .latest_since(RecordKind::Analysis, "BTCUSDT", t0 - Duration::minutes(1))
            .await
            .unwrap();
        assert!(found.is_some());

        let none = store
            .latest_since(RecordKind::Analysis, "BTCUSDT", t0 + Duration::minutes(1))
            .await
            .unwrap();
        assert!(none.is_none());

        let other_symbol = store
            .latest_since(RecordKind::Analysis, "ETHUSDT", t0 - Duration::hours(1))
            .await
            .unwrap();
        assert!(other_symbol.is_none());
    }

    #[tokio::test]
    async fn test_insert_if_absent_respects_window() {
        let store = MemoryRecordStore::new();
        let t0 = Utc::now();
        let window = Duration::hours(4);

        assert!(store
            .insert_if_absent(&record(RecordKind::Decision, "SOLUSDT", t0), window)
            .await
            .unwrap());
        assert!(!store
            .insert_if_absent(
                &record(RecordKind::Decision, "SOLUSDT", t0 + Duration::minutes(239)),
                window
            )
            .await
            .unwrap());
        assert!(store
            .insert_if_absent(
                &record(RecordKind::Decision, "SOLUSDT", t0 + Duration::minutes(241)),
                window
            )
            .await
            .unwrap());
        assert_eq!(store.records_for(RecordKind::Decision, "SOLUSDT").len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_claims_admit_one() {
        let store = std::sync::Arc::new(MemoryRecordStore::new());
        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_if_absent(&record(RecordKind::Analysis, "BNBUSDT", now), Duration::hours(4))
                    .await
                    .unwrap()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_kind_labels() {
        for kind in [RecordKind::Opportunity, RecordKind::Analysis, RecordKind::Decision] {
            assert_eq!(RecordKind::from_db(kind.as_str()), Some(kind));
        }
    }
}
