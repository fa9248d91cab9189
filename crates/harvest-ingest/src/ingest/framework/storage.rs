//! Partition store
//!
//! A partition is every row for one `(source_name, partition_date)`. Writes
//! replace the whole partition: delete what is there, then insert the new
//! generation. Nothing else in the table is touched.
//!
//! Two commit modes are offered:
//!
//! - `Atomic` (default): delete and insert share one transaction, so a failed
//!   insert leaves the previous generation in place.
//! - `TwoPhase`: delete commits first, then insert commits. A failed insert
//!   leaves the partition empty and is reported as
//!   [`PersistenceError::PartitionCleared`].

use harvest_common::PartitionKey;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::types::CanonicalRecord;
use crate::ingest::error::{PersistenceError, ReplaceStage};

/// Rows per INSERT statement (4 binds each, well under SQLite's variable cap).
const INSERT_CHUNK_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    #[default]
    Atomic,
    TwoPhase,
}

impl CommitMode {
    pub fn as_str(&self) -> &str {
        match self {
            CommitMode::Atomic => "atomic",
            CommitMode::TwoPhase => "two_phase",
        }
    }
}

impl std::str::FromStr for CommitMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "atomic" => Ok(CommitMode::Atomic),
            "two_phase" | "two-phase" | "twophase" => Ok(CommitMode::TwoPhase),
            _ => Err(anyhow::anyhow!("Invalid commit mode: {}", s)),
        }
    }
}

/// Replace-by-partition storage over the `collected_records` table.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    pool: SqlitePool,
    mode: CommitMode,
}

impl PartitionStore {
    pub fn new(pool: SqlitePool, mode: CommitMode) -> Self {
        Self { pool, mode }
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    /// Make `records` the partition's entire contents. Returns rows inserted.
    pub async fn replace_partition(
        &self,
        key: &PartitionKey,
        records: &[CanonicalRecord],
    ) -> Result<u64, PersistenceError> {
        let payloads = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PersistenceError::Encode {
                key: key.clone(),
                source,
            })?;

        match self.mode {
            CommitMode::Atomic => self.replace_atomic(key, &payloads).await,
            CommitMode::TwoPhase => self.replace_two_phase(key, &payloads).await,
        }
    }

    async fn replace_atomic(
        &self,
        key: &PartitionKey,
        payloads: &[String],
    ) -> Result<u64, PersistenceError> {
        let db_err = |stage: ReplaceStage| {
            let key = key.clone();
            move |source: sqlx::Error| PersistenceError::Database { key, stage, source }
        };

        let mut tx = self.pool.begin().await.map_err(db_err(ReplaceStage::Delete))?;

        let deleted = delete_rows(&mut tx, key)
            .await
            .map_err(db_err(ReplaceStage::Delete))?;
        insert_rows(&mut tx, key, payloads)
            .await
            .map_err(db_err(ReplaceStage::Insert))?;

        tx.commit().await.map_err(db_err(ReplaceStage::Insert))?;

        info!(
            partition = %key,
            deleted,
            inserted = payloads.len(),
            "Partition replaced"
        );
        Ok(payloads.len() as u64)
    }

    async fn replace_two_phase(
        &self,
        key: &PartitionKey,
        payloads: &[String],
    ) -> Result<u64, PersistenceError> {
        let delete_err = |source: sqlx::Error| PersistenceError::Database {
            key: key.clone(),
            stage: ReplaceStage::Delete,
            source,
        };

        let mut tx = self.pool.begin().await.map_err(delete_err)?;
        let rows_deleted = delete_rows(&mut tx, key).await.map_err(delete_err)?;
        tx.commit().await.map_err(delete_err)?;
        debug!(partition = %key, rows_deleted, "Partition cleared");

        let cleared = |source: sqlx::Error| PersistenceError::PartitionCleared {
            key: key.clone(),
            rows_deleted,
            source,
        };

        let inserted = async {
            let mut tx = self.pool.begin().await?;
            insert_rows(&mut tx, key, payloads).await?;
            tx.commit().await
        }
        .await;

        match inserted {
            Ok(()) => {
                info!(
                    partition = %key,
                    deleted = rows_deleted,
                    inserted = payloads.len(),
                    "Partition replaced"
                );
                Ok(payloads.len() as u64)
            },
            Err(source) => {
                warn!(
                    partition = %key,
                    rows_deleted,
                    "Insert failed after committed delete; partition is empty"
                );
                Err(cleared(source))
            },
        }
    }

    /// Current live rows, in insertion order.
    pub async fn load_partition(
        &self,
        key: &PartitionKey,
    ) -> Result<Vec<CanonicalRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM collected_records
            WHERE source_name = ? AND partition_date = ?
            ORDER BY row_no
            "#,
        )
        .bind(key.source_name())
        .bind(key.partition_date())
        .fetch_all(&self.pool)
        .await
        .map_err(|source| PersistenceError::Database {
            key: key.clone(),
            stage: ReplaceStage::Read,
            source,
        })?;

        rows.iter()
            .map(|row| {
                let payload: String =
                    row.try_get("payload").map_err(|source| PersistenceError::Database {
                        key: key.clone(),
                        stage: ReplaceStage::Read,
                        source,
                    })?;
                serde_json::from_str(&payload).map_err(|source| PersistenceError::Decode {
                    key: key.clone(),
                    source,
                })
            })
            .collect()
    }

    pub async fn count_partition(&self, key: &PartitionKey) -> Result<u64, PersistenceError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM collected_records WHERE source_name = ? AND partition_date = ?",
        )
        .bind(key.source_name())
        .bind(key.partition_date())
        .fetch_one(&self.pool)
        .await
        .map_err(|source| PersistenceError::Database {
            key: key.clone(),
            stage: ReplaceStage::Read,
            source,
        })?;

        Ok(count.max(0) as u64)
    }
}

async fn delete_rows(conn: &mut SqliteConnection, key: &PartitionKey) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM collected_records WHERE source_name = ? AND partition_date = ?")
            .bind(key.source_name())
            .bind(key.partition_date())
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected())
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    key: &PartitionKey,
    payloads: &[String],
) -> Result<(), sqlx::Error> {
    for (chunk_idx, chunk) in payloads.chunks(INSERT_CHUNK_SIZE).enumerate() {
        let offset = chunk_idx * INSERT_CHUNK_SIZE;
        let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO collected_records (source_name, partition_date, row_no, payload) ",
        );
        query_builder.push_values(chunk.iter().enumerate(), |mut b, (i, payload)| {
            b.push_bind(key.source_name())
                .push_bind(key.partition_date())
                .push_bind((offset + i) as i64)
                .push_bind(payload.as_str());
        });
        query_builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}
