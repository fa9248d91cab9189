//! Page-scrape adapter
//!
//! Fetches an HTML document and extracts records with CSS selectors, either
//! one record of named fields or one record per table row. When the expected
//! structure is missing, a configured fallback document is used instead and
//! the batch is marked as fallback.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::warn;

use super::fetch_text;
use crate::ingest::error::FetchError;
use crate::ingest::framework::adapter::{AdapterKind, SourceAdapter};
use crate::ingest::framework::types::{AcquireParams, RawBatch, RawRecord};

fn parse_selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// One record per matching table row.
#[derive(Debug, Clone)]
pub struct TableExtractor {
    table_css: String,
    min_cells: usize,
    /// (cell index, field name)
    columns: Vec<(usize, String)>,
}

impl TableExtractor {
    /// Rows are `tbody tr`, cells are `td`. Rows with fewer cells than the
    /// highest mapped index are skipped.
    pub fn new(table_css: &str, columns: &[(usize, &str)]) -> Result<Self, FetchError> {
        parse_selector(table_css)?;
        let min_cells = columns.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
        Ok(Self {
            table_css: table_css.to_string(),
            min_cells,
            columns: columns
                .iter()
                .map(|(i, name)| (*i, (*name).to_string()))
                .collect(),
        })
    }

    pub fn min_cells(mut self, min_cells: usize) -> Self {
        self.min_cells = self.min_cells.max(min_cells);
        self
    }

    fn extract(&self, document: &Html) -> Result<Option<Vec<RawRecord>>, FetchError> {
        let (table_sel, row_sel, cell_sel) = (
            parse_selector(&self.table_css)?,
            parse_selector("tbody tr")?,
            parse_selector("td")?,
        );
        let Some(table) = document.select(&table_sel).next() else {
            return Ok(None);
        };
        let records: Vec<RawRecord> = table
            .select(&row_sel)
            .filter_map(|row| {
                let cells: Vec<String> = row.select(&cell_sel).map(element_text).collect();
                if cells.len() < self.min_cells {
                    return None;
                }
                let mut record = RawRecord::new();
                for (index, field) in &self.columns {
                    record.insert(field.clone(), Value::String(cells[*index].clone()));
                }
                Some(record)
            })
            .collect();

        Ok(if records.is_empty() { None } else { Some(records) })
    }
}

#[derive(Debug, Clone)]
pub struct FieldSelector {
    pub field: String,
    css: String,
    nth: usize,
}

/// One record built from named selectors, present only if the anchor matches.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    anchor_css: String,
    fields: Vec<FieldSelector>,
}

impl FieldExtractor {
    pub fn new(anchor_css: &str) -> Result<Self, FetchError> {
        parse_selector(anchor_css)?;
        Ok(Self {
            anchor_css: anchor_css.to_string(),
            fields: Vec::new(),
        })
    }

    /// Map the first match of `css` to `field`.
    pub fn field(self, field: &str, css: &str) -> Result<Self, FetchError> {
        self.field_nth(field, css, 0)
    }

    /// Map the `nth` (zero-based) match of `css` to `field`.
    pub fn field_nth(mut self, field: &str, css: &str, nth: usize) -> Result<Self, FetchError> {
        parse_selector(css)?;
        self.fields.push(FieldSelector {
            field: field.to_string(),
            css: css.to_string(),
            nth,
        });
        Ok(self)
    }

    fn extract(&self, document: &Html) -> Result<Option<Vec<RawRecord>>, FetchError> {
        if document.select(&parse_selector(&self.anchor_css)?).next().is_none() {
            return Ok(None);
        }

        let mut record = RawRecord::new();
        for field in &self.fields {
            match document.select(&parse_selector(&field.css)?).nth(field.nth) {
                Some(element) => {
                    record.insert(field.field.clone(), Value::String(element_text(element)));
                },
                None => warn!(field = %field.field, selector = %field.css, "Field not found in page"),
            }
        }
        Ok(Some(vec![record]))
    }
}

#[derive(Debug, Clone)]
pub enum PageExtractor {
    Table(TableExtractor),
    Fields(FieldExtractor),
}

impl PageExtractor {
    /// `Ok(None)` when the structure the extractor keys on is absent.
    pub fn extract(&self, html: &str) -> Result<Option<Vec<RawRecord>>, FetchError> {
        let document = Html::parse_document(html);
        match self {
            PageExtractor::Table(table) => table.extract(&document),
            PageExtractor::Fields(fields) => fields.extract(&document),
        }
    }

    fn structure(&self) -> &str {
        match self {
            PageExtractor::Table(table) => &table.table_css,
            PageExtractor::Fields(fields) => &fields.anchor_css,
        }
    }
}

impl From<TableExtractor> for PageExtractor {
    fn from(table: TableExtractor) -> Self {
        PageExtractor::Table(table)
    }
}

impl From<FieldExtractor> for PageExtractor {
    fn from(fields: FieldExtractor) -> Self {
        PageExtractor::Fields(fields)
    }
}

pub struct PageScrapeAdapter {
    client: Client,
    url_template: String,
    query: Vec<(String, String)>,
    extractor: PageExtractor,
    fallback_document: Option<String>,
}

impl PageScrapeAdapter {
    pub fn new(client: Client, url_template: impl Into<String>, extractor: impl Into<PageExtractor>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
            query: Vec::new(),
            extractor: extractor.into(),
            fallback_document: None,
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Document to extract from when the live page is unusable.
    pub fn with_fallback(mut self, document: impl Into<String>) -> Self {
        self.fallback_document = Some(document.into());
        self
    }

    async fn acquire_live(&self, params: &AcquireParams) -> Result<Vec<RawRecord>, FetchError> {
        let url = params.render(&self.url_template);
        let query: Vec<(String, String)> = self
            .query
            .iter()
            .map(|(k, v)| (k.clone(), params.render(v)))
            .collect();

        let body = fetch_text(&self.client, &url, &query, &[]).await?;
        self.extractor
            .extract(&body)?
            .ok_or_else(|| FetchError::StructureMissing {
                selector: self.extractor.structure().to_string(),
            })
    }
}

#[async_trait]
impl SourceAdapter for PageScrapeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::PageScrape
    }

    fn describe(&self) -> String {
        format!("GET {} [{}]", self.url_template, self.extractor.structure())
    }

    async fn acquire(&self, params: &AcquireParams) -> Result<RawBatch, FetchError> {
        let live_error = match self.acquire_live(params).await {
            Ok(records) => return Ok(RawBatch::live(records)),
            Err(e) => e,
        };

        let Some(document) = &self.fallback_document else {
            return Err(live_error);
        };

        warn!(
            url = %self.url_template,
            "Live page unusable ({}), extracting from fallback document",
            live_error
        );
        match self.extractor.extract(document)? {
            Some(records) => Ok(RawBatch::fallback(records)),
            None => Err(live_error),
        }
    }
}
