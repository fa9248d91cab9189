//! Blog postings for a search keyword
//!
//! The search API is walked with `start`/`display` offsets. Only the top
//! postings are kept, each reduced to a short headline cut from its snippet
//! (or from its title when the snippet is mostly markup and search terms).
//! When the API is unreachable or the credentials are rejected, a canned
//! result set is used instead.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;

use crate::config::SourcesConfig;
use crate::ingest::adapters::{Paging, RestAdapter};
use crate::ingest::error::{FetchError, SchemaError};
use crate::ingest::framework::adapter::{AdapterKind, SourceAdapter};
use crate::ingest::framework::controller::CandidateStrategy;
use crate::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use crate::ingest::framework::source::SourceDefinition;
use crate::ingest::framework::types::{AcquireParams, RawBatch, RawRecord};

pub const NAME: &str = "naver_blog";
pub const PAGE_SIZE: usize = 10;
pub const MAX_PAGES: usize = 2;
pub const KEEP_TOP: usize = 5;
pub const HEADLINE_CHARS: usize = 20;
/// Shorter snippets fall back to the posting title.
pub const MIN_HEADLINE_CHARS: usize = 5;

const MARKUP: &[&str] = &["<b>", "</b>", "'", "#"];

pub const FALLBACK_DOCUMENT: &str = r#"{"items": [
  {"title": "시흥대야역 맛집 추천 베스트 5곳", "link": "https://blog.naver.com/example1",
   "description": "시흥대야역 주변 <b>맛집</b> 소개합니다. 정말 맛있는 곳들이에요!"},
  {"title": "대야역 근처 분위기 좋은 카페", "link": "https://blog.naver.com/example2",
   "description": "대야역에서 가까운 <b>카페</b> 추천드려요. 데이트하기 좋아요."},
  {"title": "시흥 대야동 숨은 맛집 발견", "link": "https://blog.naver.com/example3",
   "description": "대야동에 있는 숨은 <b>맛집</b>을 발견했어요. 꼭 가보세요!"},
  {"title": "대야역 맛집 리뷰 모음", "link": "https://blog.naver.com/example4",
   "description": "대야역 주변 <b>맛집</b> 리뷰를 정리해봤습니다."},
  {"title": "시흥시 대야동 맛있는 식당 추천", "link": "https://blog.naver.com/example5",
   "description": "시흥시 대야동의 <b>맛있는 식당</b>들을 소개합니다."}
]}"#;

pub fn schema() -> Result<DatasetSchema, SchemaError> {
    DatasetSchema::stamped(
        NAME,
        vec![
            ColumnSpec::text("keyword"),
            ColumnSpec::text("title"),
            ColumnSpec::text("link"),
        ],
    )
}

fn clean(text: &str, strip: &[String]) -> String {
    let mut out = text.to_string();
    for markup in MARKUP {
        out = out.replace(markup, "");
    }
    for term in strip.iter().filter(|t| !t.is_empty()) {
        out = out.replace(term.as_str(), "");
    }
    out.chars().take(HEADLINE_CHARS).collect()
}

/// Headline for one search item: the cleaned snippet, or the cleaned title
/// when the snippet has fewer than [`MIN_HEADLINE_CHARS`] characters left.
pub fn headline(item: &RawRecord, strip: &[String]) -> String {
    let field = |name: &str| item.get(name).and_then(Value::as_str).unwrap_or("");

    let snippet = clean(field("description"), strip);
    if snippet.trim().chars().count() >= MIN_HEADLINE_CHARS {
        return snippet.trim().to_string();
    }
    clean(field("title"), &[]).trim().to_string()
}

/// Keeps the top postings of a search and reshapes them into rows.
pub struct BlogSearchAdapter {
    search: RestAdapter,
    keyword: String,
    strip: Vec<String>,
}

impl BlogSearchAdapter {
    pub fn new(search: RestAdapter, keyword: impl Into<String>, strip: Vec<String>) -> Self {
        Self {
            search,
            keyword: keyword.into(),
            strip,
        }
    }

    fn posting(&self, item: &RawRecord) -> RawRecord {
        let mut row = RawRecord::new();
        row.insert("keyword".to_string(), Value::from(self.keyword.as_str()));
        row.insert("title".to_string(), Value::from(headline(item, &self.strip)));
        row.insert(
            "link".to_string(),
            item.get("link").cloned().unwrap_or(Value::Null),
        );
        row
    }
}

#[async_trait]
impl SourceAdapter for BlogSearchAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::RestCall
    }

    fn describe(&self) -> String {
        format!("{} (top {})", self.search.describe(), KEEP_TOP)
    }

    async fn acquire(&self, params: &AcquireParams) -> Result<RawBatch, FetchError> {
        let mut batch = self.search.acquire(params).await?;
        batch.records = batch
            .records
            .iter()
            .take(KEEP_TOP)
            .map(|item| self.posting(item))
            .collect();
        Ok(batch)
    }
}

pub fn adapter(client: Client, sources: &SourcesConfig) -> BlogSearchAdapter {
    let mut search = RestAdapter::new(client, sources.naver_blog_api_url.as_str())
        .query("query", sources.naver_blog_keyword.as_str())
        .query("start", "{start}")
        .query("display", "{page_size}")
        .records_at("items")
        .paged(Paging::new(PAGE_SIZE, MAX_PAGES))
        .with_fallback(FALLBACK_DOCUMENT);
    if let Some(id) = &sources.naver_client_id {
        search = search.header("X-Naver-Client-Id", id.as_str());
    }
    if let Some(secret) = &sources.naver_client_secret {
        search = search.header("X-Naver-Client-Secret", secret.as_str());
    }
    BlogSearchAdapter::new(
        search,
        sources.naver_blog_keyword.as_str(),
        sources.naver_blog_strip.clone(),
    )
}

pub fn definition(client: Client, sources: &SourcesConfig) -> Result<SourceDefinition, SchemaError> {
    Ok(SourceDefinition::single(
        NAME,
        "Top blog postings for the configured search keyword",
        schema()?,
        Arc::new(adapter(client, sources)),
        CandidateStrategy::Single,
    ))
}
