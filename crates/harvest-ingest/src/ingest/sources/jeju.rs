//! Jeju floating population, one feed per district
//!
//! The data hub serves a window that closes about ninety days before the run
//! date, so each feed asks for the sixty days ending there.

use reqwest::Client;
use std::sync::Arc;

use crate::config::SourcesConfig;
use crate::ingest::adapters::{Paging, RestAdapter};
use crate::ingest::error::SchemaError;
use crate::ingest::framework::controller::CandidateStrategy;
use crate::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use crate::ingest::framework::source::{Feed, SourceDefinition};

pub const NAME: &str = "jeju_floating_population";
pub const WINDOW_END_DAYS: u32 = 90;
pub const WINDOW_START: &str = "{base_date-60}";
pub const PAGE_SIZE: usize = 100;
pub const MAX_PAGES: usize = 10;

pub fn schema() -> Result<DatasetSchema, SchemaError> {
    DatasetSchema::stamped(
        NAME,
        vec![
            ColumnSpec::text("regist_dt").alias("registDt"),
            ColumnSpec::text("city"),
            ColumnSpec::text("emd"),
            ColumnSpec::text("gender"),
            ColumnSpec::text("age_group").alias("ageGroup"),
            ColumnSpec::float("resd_pop").alias("residentPop"),
            ColumnSpec::float("work_pop").alias("workPop"),
            ColumnSpec::float("visit_pop").alias("visitPop"),
        ],
    )
}

pub fn strategy() -> CandidateStrategy {
    CandidateStrategy::DayWalkback {
        offset: WINDOW_END_DAYS,
        steps: 1,
    }
}

pub fn adapter(client: Client, sources: &SourcesConfig, region: &str) -> RestAdapter {
    let url = format!(
        "{}/{}",
        sources.jeju_api_url.trim_end_matches('/'),
        sources.jeju_api_key.as_deref().unwrap_or_default()
    );
    RestAdapter::new(client, url)
        .query("startDate", WINDOW_START)
        .query("endDate", "{base_date}")
        .query("emd", region)
        .query("number", "{page}")
        .query("limit", "{page_size}")
        .records_at("data")
        .paged(Paging::new(PAGE_SIZE, MAX_PAGES))
}

pub fn definition(client: Client, sources: &SourcesConfig) -> Result<SourceDefinition, SchemaError> {
    let mut source = SourceDefinition::new(
        NAME,
        "Jeju floating population by district, gender and age group",
        schema()?,
    );
    for region in &sources.jeju_regions {
        let feed = Feed::new(
            region.as_str(),
            Arc::new(adapter(client.clone(), sources, region)),
            strategy(),
        )
        .constant("emd", region.as_str());
        source = source.feed(feed);
    }
    Ok(source)
}
