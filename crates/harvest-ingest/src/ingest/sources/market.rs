//! Daily index bars (KOSPI, KOSDAQ, NASDAQ, S&P500, Dow Jones)
//!
//! The endpoint template takes `{symbol}` and answers
//! `{"data": [{"Date": .., "Open": .., "High": .., "Low": .., "Close": .., "Volume": ..}]}`
//! for `start`/`end` in ISO format. Korean indices are asked for the
//! partition's business day; US indices for the business day before, since
//! their session closes after the Korean day starts.

use reqwest::Client;
use std::sync::Arc;

use crate::ingest::adapters::RestAdapter;
use crate::ingest::error::SchemaError;
use crate::ingest::framework::controller::CandidateStrategy;
use crate::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use crate::ingest::framework::source::{Feed, SourceDefinition};

pub const NAME: &str = "market_index";

/// Business days tried per index before giving up.
pub const WALKBACK_STEPS: u32 = 5;

/// (market label, upstream symbol, business-day offset)
pub const INDICES: &[(&str, &str, u32)] = &[
    ("KOSPI", "KS11", 0),
    ("KOSDAQ", "KQ11", 0),
    ("NASDAQ", "IXIC", 1),
    ("S&P500", "US500", 1),
    ("DowJones", "DJI", 1),
];

pub fn schema() -> Result<DatasetSchema, SchemaError> {
    DatasetSchema::stamped(
        NAME,
        vec![
            ColumnSpec::text("market"),
            ColumnSpec::text("trading_day").alias("Date"),
            ColumnSpec::float("open").alias("Open"),
            ColumnSpec::float("high").alias("High"),
            ColumnSpec::float("low").alias("Low"),
            ColumnSpec::float("close").alias("Close"),
            ColumnSpec::integer("volume").alias("Volume"),
        ],
    )
}

pub fn definition(client: Client, url_template: &str) -> Result<SourceDefinition, SchemaError> {
    let mut source = SourceDefinition::new(NAME, "Daily bars for the tracked market indices", schema()?);

    for (market, symbol, offset) in INDICES {
        let adapter = RestAdapter::new(client.clone(), url_template.replace("{symbol}", symbol))
            .query("start", "{base_date_iso}")
            .query("end", "{base_date_iso}")
            .records_at("data");
        let feed = Feed::new(
            *market,
            Arc::new(adapter),
            CandidateStrategy::BusinessDayWalkback {
                offset: *offset,
                steps: WALKBACK_STEPS,
            },
        )
        .constant("market", *market)
        .constant("symbol", *symbol);
        source = source.feed(feed);
    }
    Ok(source)
}
