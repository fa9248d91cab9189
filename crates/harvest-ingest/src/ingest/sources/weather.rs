//! Ultra-short-term weather observations (nowcast)
//!
//! Observations are published hourly, so a slot that is not out yet simply
//! answers without `body`. Every slot of the day is tried, then every slot
//! of the previous day.

use reqwest::Client;
use std::sync::Arc;

use crate::config::SourcesConfig;
use crate::ingest::adapters::RestAdapter;
use crate::ingest::error::SchemaError;
use crate::ingest::framework::controller::CandidateStrategy;
use crate::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use crate::ingest::framework::source::{Feed, SourceDefinition};
use crate::ingest::framework::types::FieldValue;

pub const NAME: &str = "weather_nowcast";
pub const SLOTS: &[&str] = &["0600", "0700", "0800", "0900", "1000", "1100"];
pub const DEFAULT_BASE_TIME: &str = "0600";
pub const ROWS_PER_PAGE: u32 = 10;

pub fn schema() -> Result<DatasetSchema, SchemaError> {
    DatasetSchema::stamped(
        NAME,
        vec![
            ColumnSpec::text("base_date").alias("baseDate"),
            ColumnSpec::text("base_time")
                .alias("baseTime")
                .with_default(FieldValue::text(DEFAULT_BASE_TIME)),
            ColumnSpec::text("category"),
            ColumnSpec::integer("nx"),
            ColumnSpec::integer("ny"),
            ColumnSpec::text("obsr_value").alias("obsrValue"),
        ],
    )
}

pub fn strategy() -> CandidateStrategy {
    CandidateStrategy::TimeSlots {
        slots: SLOTS.iter().map(|s| s.to_string()).collect(),
        days_back: 1,
    }
}

pub fn definition(client: Client, sources: &SourcesConfig) -> Result<SourceDefinition, SchemaError> {
    let nx = sources.kma_nx.to_string();
    let ny = sources.kma_ny.to_string();

    let mut adapter = RestAdapter::new(client, sources.kma_api_url.as_str());
    if let Some(key) = &sources.kma_api_key {
        adapter = adapter.query("authKey", key.as_str());
    }
    let adapter = adapter
        .query("dataType", "JSON")
        .query("numOfRows", ROWS_PER_PAGE.to_string())
        .query("pageNo", "1")
        .query("base_date", "{base_date}")
        .query("base_time", "{slot}")
        .query("nx", nx.as_str())
        .query("ny", ny.as_str())
        .records_at("response.body.items.item");

    let attempts = SLOTS.len() * 2;
    let feed = Feed::new(NAME, Arc::new(adapter), strategy())
        .constant("nx", sources.kma_nx)
        .constant("ny", sources.kma_ny)
        .max_attempts(attempts);

    Ok(SourceDefinition::new(
        NAME,
        "Hourly observations for the configured forecast grid cell",
        schema()?,
    )
    .feed(feed))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_slots_cover_today_then_yesterday() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let labels: Vec<String> = strategy().candidates(date).iter().map(|c| c.label()).collect();
        assert_eq!(labels.len(), 12);
        assert_eq!(labels[0], "20240304/0600");
        assert_eq!(labels[5], "20240304/1100");
        assert_eq!(labels[6], "20240303/0600");
    }

    #[test]
    fn test_feed_allows_every_slot() {
        let source = definition(Client::new(), &SourcesConfig::default()).unwrap();
        assert_eq!(source.feeds[0].max_attempts, Some(12));
        assert_eq!(source.feeds[0].constants["nx"], 55);
    }
}
