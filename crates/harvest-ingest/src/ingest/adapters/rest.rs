//! REST-call adapter
//!
//! GETs a JSON endpoint and walks a fixed key path (for example
//! `response.body.items.item`) down to the record list. A missing key is a
//! fetch error naming the keys that were present at that level.
//!
//! Paged endpoints are walked page by page until a page comes back short.
//! The URL and query values may use `{start}`/`{end}` (1-based inclusive row
//! offsets), `{page}` (1-based page number) and `{page_size}`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::fetch_text;
use crate::ingest::error::FetchError;
use crate::ingest::framework::adapter::{AdapterKind, SourceAdapter};
use crate::ingest::framework::types::{AcquireParams, RawBatch, RawRecord};

/// Page size and the most pages one attempt may fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page_size: usize,
    pub max_pages: usize,
}

impl Paging {
    pub fn new(page_size: usize, max_pages: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
        }
    }

    /// Substitute the paging placeholders for zero-based page `index`.
    pub fn render(&self, template: &str, index: usize) -> String {
        let start = index * self.page_size + 1;
        let end = start + self.page_size - 1;
        template
            .replace("{start}", &start.to_string())
            .replace("{end}", &end.to_string())
            .replace("{page}", &(index + 1).to_string())
            .replace("{page_size}", &self.page_size.to_string())
    }
}

pub struct RestAdapter {
    client: Client,
    url_template: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    records_path: Vec<String>,
    paging: Option<Paging>,
    fallback_document: Option<String>,
}

impl RestAdapter {
    pub fn new(client: Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
            query: Vec::new(),
            headers: Vec::new(),
            records_path: Vec::new(),
            paging: None,
            fallback_document: None,
        }
    }

    /// Query parameter; the value may use `{base_date}` style placeholders.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Dot-separated path from the response root to the records.
    pub fn records_at(mut self, path: &str) -> Self {
        self.records_path = path
            .split('.')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    pub fn paged(mut self, paging: Paging) -> Self {
        self.paging = Some(paging);
        self
    }

    /// JSON document to extract from when the live endpoint fails.
    pub fn with_fallback(mut self, document: impl Into<String>) -> Self {
        self.fallback_document = Some(document.into());
        self
    }

    async fn fetch_page(
        &self,
        params: &AcquireParams,
        page: Option<(Paging, usize)>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let render = |template: &str| {
            let rendered = params.render(template);
            match page {
                Some((paging, index)) => paging.render(&rendered, index),
                None => rendered,
            }
        };
        let url = render(&self.url_template);
        let query: Vec<(String, String)> = self
            .query
            .iter()
            .map(|(k, v)| (k.clone(), render(v)))
            .collect();

        let body = fetch_text(&self.client, &url, &query, &self.headers).await?;
        let root: Value = serde_json::from_str(&body)?;
        let records = extract_records(&root, &self.records_path)?;

        debug!(url = %url, records = records.len(), "Parsed REST response");
        Ok(records)
    }

    async fn acquire_live(&self, params: &AcquireParams) -> Result<Vec<RawRecord>, FetchError> {
        let Some(paging) = self.paging else {
            return self.fetch_page(params, None).await;
        };

        let mut records = Vec::new();
        for index in 0..paging.max_pages {
            let page = match self.fetch_page(params, Some((paging, index))).await {
                Ok(page) => page,
                // Past the last row some upstreams answer without the record key.
                Err(FetchError::MissingKeys { .. }) if index > 0 => break,
                Err(e) => return Err(e),
            };
            let short = page.len() < paging.page_size;
            records.extend(page);
            if short {
                return Ok(records);
            }
        }

        if records.len() >= paging.page_size * paging.max_pages {
            warn!(
                url = %self.url_template,
                max_pages = paging.max_pages,
                "Stopped paging at the page limit"
            );
        }
        Ok(records)
    }
}

/// Walk `path` from `root` and turn the terminal value into records.
///
/// An array yields its object elements, a single object yields one record,
/// and `null` or `""` yields none.
pub fn extract_records(root: &Value, path: &[String]) -> Result<Vec<RawRecord>, FetchError> {
    let mut current = root;
    for (depth, key) in path.iter().enumerate() {
        let walked = path[..=depth].join(".");
        current = match current {
            Value::Object(map) => map.get(key).ok_or_else(|| FetchError::MissingKeys {
                path: walked,
                present: map.keys().cloned().collect(),
            })?,
            _ => {
                return Err(FetchError::MissingKeys {
                    path: walked,
                    present: Vec::new(),
                })
            },
        };
    }

    match current {
        Value::Array(items) => {
            let total = items.len();
            let records: Vec<RawRecord> = items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect();
            if records.len() < total {
                warn!(
                    skipped = total - records.len(),
                    "Ignoring non-object entries in record list"
                );
            }
            Ok(records)
        },
        Value::Object(map) => Ok(vec![map.clone()]),
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        other => Err(FetchError::UnexpectedShape {
            path: path.join("."),
            found: other.to_string(),
        }),
    }
}

#[async_trait]
impl SourceAdapter for RestAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::RestCall
    }

    fn describe(&self) -> String {
        format!("GET {} -> {}", self.url_template, self.records_path.join("."))
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
            "Live endpoint unusable ({}), extracting from fallback document",
            live_error
        );
        let root: Value = serde_json::from_str(document)?;
        Ok(RawBatch::fallback(extract_records(&root, &self.records_path)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(str::to_string).collect()
    }

    #[test]
    fn test_walks_nested_path() {
        let body = json!({
            "response": {"header": {"resultCode": "00"}, "body": {"items": {"item": [
                {"category": "T1H", "obsrValue": "3.2"},
                {"category": "RN1", "obsrValue": "0"},
                "garbage"
            ]}}}
        });
        let records = extract_records(&body, &path("response.body.items.item")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["category"], "T1H");
    }

    #[test]
    fn test_missing_key_names_present_keys() {
        let body = json!({"response": {"header": {"resultCode": "03", "resultMsg": "NO_DATA"}}});
        let err = extract_records(&body, &path("response.body.items.item")).unwrap_err();
        match err {
            FetchError::MissingKeys { path, present } => {
                assert_eq!(path, "response.body");
                assert_eq!(present, vec!["header".to_string()]);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_terminal_shapes() {
        let single = json!({"data": {"Close": 1.0}});
        assert_eq!(extract_records(&single, &path("data")).unwrap().len(), 1);

        let empty = json!({"response": {"body": {"items": ""}}});
        assert!(extract_records(&empty, &path("response.body.items")).unwrap().is_empty());

        let scalar = json!({"data": 5});
        assert!(matches!(
            extract_records(&scalar, &path("data")),
            Err(FetchError::UnexpectedShape { .. })
        ));

        let through_scalar = json!({"data": 5});
        assert!(matches!(
            extract_records(&through_scalar, &path("data.rows")),
            Err(FetchError::MissingKeys { .. })
        ));
    }

    #[test]
    fn test_paging_placeholders() {
        let paging = Paging::new(50, 4);
        let template = "/rows/{start}/{end}?page={page}&size={page_size}";
        assert_eq!(paging.render(template, 0), "/rows/1/50?page=1&size=50");
        assert_eq!(paging.render(template, 2), "/rows/101/150?page=3&size=50");
        assert_eq!(Paging::new(0, 0), Paging { page_size: 1, max_pages: 1 });
    }

    #[test]
    fn test_empty_path_uses_root() {
        let body = json!([{"a": 1}, {"a": 2}]);
        assert_eq!(extract_records(&body, &[]).unwrap().len(), 2);
    }
}
