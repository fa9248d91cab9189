// Error types for the collection pipeline
//
// Each stage has its own error so the run can tell "nothing usable upstream"
// apart from "we got data but could not keep it". Normalization problems never
// escape the normalizer; they are logged and the field degrades to its default.

use harvest_common::PartitionKey;
use thiserror::Error;

use super::framework::types::AttemptRecord;

/// A single acquisition attempt failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Key path '{path}' not found in response (present keys: {present:?})")]
    MissingKeys { path: String, present: Vec<String> },

    #[error("Expected structure '{selector}' not found in document")]
    StructureMissing { selector: String },

    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("Unexpected payload shape at '{path}': {found}")]
    UnexpectedShape { path: String, found: String },

    #[error("No execution target matched (tried: {})", tried.join(", "))]
    NoTarget { tried: Vec<String> },

    #[error("Command timed out after {secs}s on {target}")]
    Timeout { target: String, secs: u64 },

    #[error("Command exited with code {code} on {target}: {output}")]
    CommandFailed {
        target: String,
        code: i32,
        output: String,
    },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Every candidate of every feed failed; nothing was written.
#[derive(Debug)]
pub struct SourceExhausted {
    pub source_name: String,
    pub attempts: Vec<AttemptRecord>,
}

impl SourceExhausted {
    pub fn new(source_name: impl Into<String>, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            source_name: source_name.into(),
            attempts,
        }
    }
}

impl std::fmt::Display for SourceExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "source '{}' exhausted after {} attempt(s)",
            self.source_name,
            self.attempts.len()
        )?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, attempt)?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceExhausted {}

/// Which half of a replace failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStage {
    Delete,
    Insert,
    Read,
}

impl std::fmt::Display for ReplaceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplaceStage::Delete => write!(f, "deleting"),
            ReplaceStage::Insert => write!(f, "inserting"),
            ReplaceStage::Read => write!(f, "reading"),
        }
    }
}

/// The storage layer could not honor a replace or ledger write.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error while {stage} {key}: {source}")]
    Database {
        key: PartitionKey,
        stage: ReplaceStage,
        #[source]
        source: sqlx::Error,
    },

    /// Two-phase mode only: the delete is already committed, the insert is not.
    #[error(
        "Partition {key} was cleared ({rows_deleted} rows deleted) but the insert failed: {source}"
    )]
    PartitionCleared {
        key: PartitionKey,
        rows_deleted: u64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to encode record for {key}: {source}")]
    Encode {
        key: PartitionKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stored payload for {key} is corrupt: {source}")]
    Decode {
        key: PartitionKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("Ledger access failed for {key}: {source}")]
    Ledger {
        key: PartitionKey,
        #[source]
        source: sqlx::Error,
    },

    #[error("Ledger read failed for {partition_date}: {source}")]
    LedgerRead {
        partition_date: String,
        #[source]
        source: sqlx::Error,
    },
}

impl PersistenceError {
    /// True when a committed delete left the partition empty.
    pub fn partition_cleared(&self) -> bool {
        matches!(self, PersistenceError::PartitionCleared { .. })
    }
}

/// A raw value could not be coerced to its column type.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizationError {
    #[error("column '{column}' expected {expected}, found {found}")]
    UnexpectedShape {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("column '{column}': '{token}' is not a number")]
    BadToken { column: String, token: String },
}

/// Schema construction rejected a column layout.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Dataset '{dataset}' declares column '{column}' more than once")]
    DuplicateColumn { dataset: String, column: String },

    #[error("Dataset '{0}' has no columns")]
    Empty(String),
}
