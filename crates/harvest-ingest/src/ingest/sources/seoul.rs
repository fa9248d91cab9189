//! Seoul living population of long-stay foreigners, per district and hour
//!
//! The open-data API takes the row range in the path
//! (`.../json/<service>/<start>/<end>/<date>`) and answers a range past the
//! last row without the service key. Figures are published about ten days
//! late.

use reqwest::Client;
use std::sync::Arc;

use crate::config::SourcesConfig;
use crate::ingest::adapters::{Paging, RestAdapter};
use crate::ingest::error::SchemaError;
use crate::ingest::framework::controller::CandidateStrategy;
use crate::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use crate::ingest::framework::source::SourceDefinition;

pub const NAME: &str = "seoul_foreign_population";
pub const SERVICE: &str = "SPOP_FORN_LONG_RESD_JACHI";
pub const PUBLICATION_LAG_DAYS: u32 = 10;
pub const PAGE_SIZE: usize = 50;
pub const MAX_PAGES: usize = 20;

pub fn schema() -> Result<DatasetSchema, SchemaError> {
    DatasetSchema::stamped(
        NAME,
        vec![
            ColumnSpec::text("stdr_de_id").alias("STDR_DE_ID"),
            ColumnSpec::text("tmzon_pd_se").alias("TMZON_PD_SE"),
            ColumnSpec::text("adstrd_code_se").alias("ADSTRD_CODE_SE"),
            ColumnSpec::float("tot_lvpop_co").alias("TOT_LVPOP_CO"),
            ColumnSpec::float("china_staypop_co").alias("CHINA_STAYPOP_CO"),
            ColumnSpec::float("etc_staypop_co").alias("ETC_STAYPOP_CO"),
        ],
    )
}

pub fn strategy() -> CandidateStrategy {
    CandidateStrategy::DayWalkback {
        offset: PUBLICATION_LAG_DAYS,
        steps: 3,
    }
}

pub fn adapter(client: Client, sources: &SourcesConfig) -> RestAdapter {
    let url = format!(
        "{}/{}/json/{}/{{start}}/{{end}}/{{base_date}}",
        sources.seoul_api_url.trim_end_matches('/'),
        sources.seoul_api_key,
        SERVICE
    );
    RestAdapter::new(client, url)
        .records_at(&format!("{}.row", SERVICE))
        .paged(Paging::new(PAGE_SIZE, MAX_PAGES))
}

pub fn definition(client: Client, sources: &SourcesConfig) -> Result<SourceDefinition, SchemaError> {
    Ok(SourceDefinition::single(
        NAME,
        "Seoul long-stay foreign population by district and hour",
        schema()?,
        Arc::new(adapter(client, sources)),
        strategy(),
    ))
}
