//! Source definitions
//!
//! A source is a named dataset with a schema and one or more feeds. Each feed
//! is an adapter plus its candidate strategy; a market-index source has one
//! feed per index, a stock source one per ticker. Feed results are merged into
//! a single partition.

use std::sync::Arc;

use super::adapter::SourceAdapter;
use super::controller::CandidateStrategy;
use super::schema::DatasetSchema;
use super::types::RawRecord;

#[derive(Clone)]
pub struct Feed {
    pub label: String,
    pub adapter: Arc<dyn SourceAdapter>,
    pub strategy: CandidateStrategy,
    /// Fields set on every record this feed produces, unless the upstream
    /// already supplied them.
    pub constants: RawRecord,
    /// Overrides the controller's attempt limit for this feed.
    pub max_attempts: Option<usize>,
}

impl Feed {
    pub fn new(
        label: impl Into<String>,
        adapter: Arc<dyn SourceAdapter>,
        strategy: CandidateStrategy,
    ) -> Self {
        Self {
            label: label.into(),
            adapter,
            strategy,
            constants: RawRecord::new(),
            max_attempts: None,
        }
    }

    pub fn constant(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.constants.insert(field.into(), value.into());
        self
    }

    pub fn max_attempts(mut self, limit: usize) -> Self {
        self.max_attempts = Some(limit);
        self
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("label", &self.label)
            .field("adapter", &self.adapter.describe())
            .field("strategy", &self.strategy)
            .field("constants", &self.constants)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SourceDefinition {
    pub name: String,
    pub description: String,
    pub schema: DatasetSchema,
    pub feeds: Vec<Feed>,
}

impl SourceDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: DatasetSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            feeds: Vec::new(),
        }
    }

    pub fn feed(mut self, feed: Feed) -> Self {
        self.feeds.push(feed);
        self
    }

    /// Convenience for single-feed sources.
    pub fn single(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: DatasetSchema,
        adapter: Arc<dyn SourceAdapter>,
        strategy: CandidateStrategy,
    ) -> Self {
        let name = name.into();
        let feed = Feed::new(name.clone(), adapter, strategy);
        Self::new(name, description, schema).feed(feed)
    }
}
