//! Common types used across Harvest
//!
//! Partition dates (`strd_dt`) and ingestion stamps (`ins_dt`) are kept as
//! fixed-width digit strings so they sort lexicographically and compare the
//! same way for every source.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// `strd_dt` layout.
pub const PARTITION_DATE_FORMAT: &str = "%Y%m%d";

/// `ins_dt` layout.
pub const INGESTED_AT_FORMAT: &str = "%Y%m%d%H%M%S";

/// Identifies one replaceable generation of collected data.
///
/// # Examples
///
/// ```rust
/// use harvest_common::types::PartitionKey;
///
/// let key = PartitionKey::new("market", "20240105").unwrap();
/// assert_eq!(key.source_name(), "market");
/// assert_eq!(key.partition_date(), "20240105");
/// assert!(PartitionKey::new("market", "2024-01-05").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    source_name: String,
    partition_date: String,
}

impl PartitionKey {
    /// Build a key, validating both components.
    pub fn new(source_name: impl Into<String>, partition_date: impl Into<String>) -> Result<Self> {
        let source_name = source_name.into();
        let partition_date = partition_date.into();

        if source_name.trim().is_empty() {
            return Err(HarvestError::InvalidSourceName(
                "source name cannot be empty".to_string(),
            ));
        }
        parse_partition_date(&partition_date)?;

        Ok(Self {
            source_name,
            partition_date,
        })
    }

    /// Build a key from an already-valid calendar date.
    pub fn for_date(source_name: impl Into<String>, date: NaiveDate) -> Result<Self> {
        Self::new(source_name, format_partition_date(date))
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn partition_date(&self) -> &str {
        &self.partition_date
    }

    /// The partition date as a calendar date.
    pub fn date(&self) -> Result<NaiveDate> {
        parse_partition_date(&self.partition_date)
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.source_name, self.partition_date)
    }
}

/// Render a date as `YYYYMMDD`.
pub fn format_partition_date(date: NaiveDate) -> String {
    date.format(PARTITION_DATE_FORMAT).to_string()
}

/// Parse a strict 8-digit `YYYYMMDD` string.
pub fn parse_partition_date(value: &str) -> Result<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HarvestError::InvalidPartitionDate(value.to_string()));
    }
    NaiveDate::parse_from_str(value, PARTITION_DATE_FORMAT)
        .map_err(|_| HarvestError::InvalidPartitionDate(value.to_string()))
}

/// Render a timestamp as `YYYYMMDDHHMMSS`.
pub fn format_ingested_at<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.format(INGESTED_AT_FORMAT).to_string()
}

/// Parse a strict 14-digit `YYYYMMDDHHMMSS` string.
pub fn parse_ingested_at(value: &str) -> Result<NaiveDateTime> {
    if value.len() != 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HarvestError::InvalidTimestamp(value.to_string()));
    }
    NaiveDateTime::parse_from_str(value, INGESTED_AT_FORMAT)
        .map_err(|_| HarvestError::InvalidTimestamp(value.to_string()))
}

/// Current local wall-clock stamp.
pub fn ingested_at_now() -> String {
    format_ingested_at(&Local::now())
}

/// Today's local partition date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
