//! Error types for Harvest

use thiserror::Error;

/// Result type alias for Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Validation errors for the shared domain types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarvestError {
    #[error("Invalid partition date '{0}': expected 8-digit YYYYMMDD calendar date")]
    InvalidPartitionDate(String),

    #[error("Invalid ingestion timestamp '{0}': expected 14-digit YYYYMMDDHHMMSS")]
    InvalidTimestamp(String),

    #[error("Invalid source name: {0}")]
    InvalidSourceName(String),
}
