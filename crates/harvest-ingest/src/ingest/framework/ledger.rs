//! Run ledger
//!
//! One row per `(partition_date, source_name)` recording how the latest run
//! ended. Re-running a partition overwrites its row.

use harvest_common::types::ingested_at_now;
use harvest_common::PartitionKey;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use super::types::RunStatus;
use crate::ingest::error::PersistenceError;

/// Longest message the ledger keeps, in characters.
pub const MESSAGE_CAP: usize = 500;

const ELLIPSIS: &str = "...";

/// Cut `message` to at most `cap` characters, ending in `...` when cut.
///
/// Counts characters, not bytes.
pub fn truncate_message(message: &str, cap: usize) -> String {
    if message.chars().count() <= cap {
        return message.to_string();
    }
    let keep = cap.saturating_sub(ELLIPSIS.len());
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(&ELLIPSIS[..cap.min(ELLIPSIS.len())]);
    out
}

/// A ledger row (maps to `collection_runs`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub partition_date: String,
    pub source_name: String,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    pub record_count: i64,
    pub message: String,
    pub ingested_at: String,
}

#[derive(Debug, Clone)]
pub struct RunLedger {
    pool: SqlitePool,
}

impl RunLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record an outcome stamped with the current time.
    pub async fn record(
        &self,
        key: &PartitionKey,
        status: RunStatus,
        count: u64,
        message: &str,
    ) -> Result<LedgerEntry, PersistenceError> {
        self.record_at(key, status, count, message, &ingested_at_now())
            .await
    }

    /// Record an outcome with an explicit `ins_dt`.
    pub async fn record_at(
        &self,
        key: &PartitionKey,
        status: RunStatus,
        count: u64,
        message: &str,
        ingested_at: &str,
    ) -> Result<LedgerEntry, PersistenceError> {
        let entry = LedgerEntry {
            partition_date: key.partition_date().to_string(),
            source_name: key.source_name().to_string(),
            status,
            record_count: i64::try_from(count).unwrap_or(i64::MAX),
            message: truncate_message(message, MESSAGE_CAP),
            ingested_at: ingested_at.to_string(),
        };

        let ledger_err = |source: sqlx::Error| PersistenceError::Ledger {
            key: key.clone(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(ledger_err)?;

        sqlx::query("DELETE FROM collection_runs WHERE partition_date = ? AND source_name = ?")
            .bind(&entry.partition_date)
            .bind(&entry.source_name)
            .execute(&mut *tx)
            .await
            .map_err(ledger_err)?;

        sqlx::query(
            r#"
            INSERT INTO collection_runs
                (partition_date, source_name, status, record_count, message, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.partition_date)
        .bind(&entry.source_name)
        .bind(entry.status.as_str())
        .bind(entry.record_count)
        .bind(&entry.message)
        .bind(&entry.ingested_at)
        .execute(&mut *tx)
        .await
        .map_err(ledger_err)?;

        tx.commit().await.map_err(ledger_err)?;

        debug!(partition = %key, status = %entry.status, count, "Ledger updated");
        Ok(entry)
    }

    pub async fn fetch(&self, key: &PartitionKey) -> Result<Option<LedgerEntry>, PersistenceError> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT partition_date, source_name, status, record_count, message, ingested_at
            FROM collection_runs
            WHERE partition_date = ? AND source_name = ?
            "#,
        )
        .bind(key.partition_date())
        .bind(key.source_name())
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| PersistenceError::Ledger {
            key: key.clone(),
            source,
        })
    }

    /// Every source's row for one partition date, by source name.
    pub async fn list_for_date(
        &self,
        partition_date: &str,
    ) -> Result<Vec<LedgerEntry>, PersistenceError> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT partition_date, source_name, status, record_count, message, ingested_at
            FROM collection_runs
            WHERE partition_date = ?
            ORDER BY source_name
            "#,
        )
        .bind(partition_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| PersistenceError::LedgerRead {
            partition_date: partition_date.to_string(),
            source,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(truncate_message("ok", MESSAGE_CAP), "ok");
        let exact = "a".repeat(MESSAGE_CAP);
        assert_eq!(truncate_message(&exact, MESSAGE_CAP), exact);
    }

    #[test]
    fn test_long_message_truncated_with_ellipsis() {
        let long = "x".repeat(MESSAGE_CAP + 1);
        let cut = truncate_message(&long, MESSAGE_CAP);
        assert_eq!(cut.chars().count(), MESSAGE_CAP);
        assert!(cut.ends_with("..."));
        assert_eq!(&cut[..MESSAGE_CAP - 3], &long[..MESSAGE_CAP - 3]);
    }

    #[test]
    fn test_truncation_counts_characters() {
        let korean = "전기차 보조금 ".repeat(100);
        let cut = truncate_message(&korean, MESSAGE_CAP);
        assert_eq!(cut.chars().count(), MESSAGE_CAP);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_six_hundred_chars_keep_first_497() {
        let long: String = ('a'..='z').cycle().take(600).collect();
        let cut = truncate_message(&long, MESSAGE_CAP);
        assert_eq!(cut.chars().count(), 500);
        assert_eq!(&cut[..497], &long[..497]);
        assert_eq!(&cut[497..], "...");
    }

    #[test]
    fn test_multibyte_cut_on_char_boundary() {
        let hangul = "가".repeat(600);
        let cut = truncate_message(&hangul, MESSAGE_CAP);
        assert_eq!(cut.chars().count(), 500);
        assert_eq!(cut, format!("{}...", "가".repeat(497)));

        // Mixed widths: 1, 2, 3 and 4 byte characters.
        let mixed = "aé가🦀".repeat(150);
        let cut = truncate_message(&mixed, MESSAGE_CAP);
        assert_eq!(cut.chars().count(), 500);
        assert!(cut.starts_with("aé가🦀"));
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_tiny_cap() {
        assert_eq!(truncate_message("abcdef", 2), "..");
        assert_eq!(truncate_message("abcdef", 0), "");
    }

    #[tokio::test]
    async fn test_stored_message_is_capped() {
        let pool = connect_in_memory().await.unwrap();
        let ledger = RunLedger::new(pool);
        let key = PartitionKey::new("ev_subsidy", "20240105").unwrap();

        let message = "보".repeat(600);
        let entry = ledger
            .record_at(&key, RunStatus::Error, 0, &message, "20240105101500")
            .await
            .unwrap();
        assert_eq!(entry.message.chars().count(), MESSAGE_CAP);

        let stored = ledger.fetch(&key).await.unwrap().unwrap();
        assert_eq!(stored, entry);
        assert_eq!(stored.message, format!("{}...", "보".repeat(497)));
    }

    #[tokio::test]
    async fn test_list_for_date_reports_partition_on_failure() {
        let pool = connect_in_memory().await.unwrap();
        let ledger = RunLedger::new(pool.clone());
        pool.close().await;

        let err = ledger.list_for_date("20240105").await.unwrap_err();
        assert!(matches!(
            &err,
            PersistenceError::LedgerRead { partition_date, .. } if partition_date == "20240105"
        ));
        assert!(err.to_string().contains("20240105"));
    }
}
