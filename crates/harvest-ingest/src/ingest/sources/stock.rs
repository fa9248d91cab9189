//! Stock quote pages, one feed per stock code.

use reqwest::Client;
use std::sync::Arc;

use super::CatalogueError;
use crate::ingest::adapters::{FieldExtractor, PageScrapeAdapter};
use crate::ingest::error::{FetchError, SchemaError};
use crate::ingest::framework::controller::CandidateStrategy;
use crate::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use crate::ingest::framework::source::{Feed, SourceDefinition};

pub const NAME: &str = "stock_quote";

pub fn schema() -> Result<DatasetSchema, SchemaError> {
    DatasetSchema::stamped(
        NAME,
        vec![
            ColumnSpec::text("stock_code"),
            ColumnSpec::text("stock_name"),
            ColumnSpec::integer("prev_price"),
            ColumnSpec::integer("price"),
            ColumnSpec::integer("volume"),
        ],
    )
}

/// Selectors for the quote page; the current-price block is the anchor.
pub fn extractor() -> Result<FieldExtractor, FetchError> {
    FieldExtractor::new("div.today")?
        .field("stock_name", "div.h_company h2 a")?
        .field("stock_code", "div.h_company div.description span.code")?
        .field("price", "div.today p.no_today span.blind")?
        .field("prev_price", "table.no_info td.first span.blind")?
        .field_nth("volume", "table.no_info tr td span.blind", 2)
}

pub fn definition(
    client: Client,
    page_url: &str,
    codes: &[String],
) -> Result<SourceDefinition, CatalogueError> {
    let extractor = extractor()?;
    let mut source = SourceDefinition::new(NAME, "Current quote per tracked stock", schema()?);

    for code in codes {
        let adapter = PageScrapeAdapter::new(client.clone(), page_url, extractor.clone())
            .query("code", code.as_str());
        let feed = Feed::new(code.as_str(), Arc::new(adapter), CandidateStrategy::Single)
            .constant("stock_code", code.as_str());
        source = source.feed(feed);
    }
    Ok(source)
}
