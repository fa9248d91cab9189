//! EV purchase-subsidy status table
//!
//! Each region row carries four bracketed groups of four counts
//! (priority, corporate/institution, taxi, general). The portal renders the
//! table client-side often enough that a static snapshot is kept as the
//! fallback document.

use reqwest::Client;
use std::sync::Arc;

use super::CatalogueError;
use crate::ingest::adapters::{PageScrapeAdapter, TableExtractor};
use crate::ingest::error::{FetchError, SchemaError};
use crate::ingest::framework::controller::CandidateStrategy;
use crate::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use crate::ingest::framework::source::SourceDefinition;

pub const NAME: &str = "ev_subsidy";
pub const TABLE_SELECTOR: &str = "table.table01.fz15";
pub const GROUP_WIDTH: usize = 4;

pub const FALLBACK_DOCUMENT: &str = r#"<html><body>
<table class="table01 fz15"><tbody>
<tr><td>서울특별시</td><td>강남구</td><td>-</td><td>-</td><td>-</td><td>(100 50 30 20)</td><td>(80 40 25 15)</td><td>(70 35 20 10)</td><td>(30 15 10 5)</td></tr>
<tr><td>부산광역시</td><td>해운대구</td><td>-</td><td>-</td><td>-</td><td>(80 40 20 15)</td><td>(60 30 15 10)</td><td>(50 25 12 8)</td><td>(30 15 8 7)</td></tr>
<tr><td>대구광역시</td><td>중구</td><td>-</td><td>-</td><td>-</td><td>(60 30 15 10)</td><td>(45 22 12 8)</td><td>(40 20 10 5)</td><td>(20 10 5 3)</td></tr>
<tr><td>인천광역시</td><td>남동구</td><td>-</td><td>-</td><td>-</td><td>(70 35 18 12)</td><td>(55 28 14 9)</td><td>(45 23 12 6)</td><td>(25 12 6 4)</td></tr>
<tr><td>광주광역시</td><td>서구</td><td>-</td><td>-</td><td>-</td><td>(40 20 10 8)</td><td>(30 15 8 5)</td><td>(25 12 6 3)</td><td>(15 8 4 2)</td></tr>
</tbody></table>
</body></html>"#;

pub fn schema() -> Result<DatasetSchema, SchemaError> {
    DatasetSchema::stamped(
        NAME,
        vec![
            ColumnSpec::text("sido"),
            ColumnSpec::text("region"),
            ColumnSpec::int_list("announced", GROUP_WIDTH),
            ColumnSpec::int_list("received", GROUP_WIDTH),
            ColumnSpec::int_list("released", GROUP_WIDTH),
            ColumnSpec::int_list("remaining", GROUP_WIDTH),
        ],
    )
}

pub fn extractor() -> Result<TableExtractor, FetchError> {
    TableExtractor::new(
        TABLE_SELECTOR,
        &[
            (0, "sido"),
            (1, "region"),
            (5, "announced"),
            (6, "received"),
            (7, "released"),
            (8, "remaining"),
        ],
    )
}

pub fn definition(client: Client, portal_url: &str) -> Result<SourceDefinition, CatalogueError> {
    let adapter = PageScrapeAdapter::new(client, portal_url, extractor()?)
        .with_fallback(FALLBACK_DOCUMENT);
    Ok(SourceDefinition::single(
        NAME,
        "Regional EV subsidy application and release counts",
        schema()?,
        Arc::new(adapter),
        CandidateStrategy::Single,
    ))
}
