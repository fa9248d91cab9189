//! Source adapter interface
//!
//! An adapter turns one set of acquisition parameters into a raw batch. The
//! three families (page scrape, REST call, command execution) differ only in
//! how they reach the upstream; the controller treats them identically.

use async_trait::async_trait;
use serde::Serialize;

use super::types::{AcquireParams, RawBatch};
use crate::ingest::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    PageScrape,
    RestCall,
    CommandExec,
}

impl AdapterKind {
    pub fn as_str(&self) -> &str {
        match self {
            AdapterKind::PageScrape => "page_scrape",
            AdapterKind::RestCall => "rest_call",
            AdapterKind::CommandExec => "command_exec",
        }
    }
}

/// Acquire raw records for one candidate.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Human-readable upstream, e.g. the URL template or container rule set.
    fn describe(&self) -> String;

    /// One attempt, no retries. An `Ok` with no records counts as a failure
    /// at the controller.
    async fn acquire(&self, params: &AcquireParams) -> Result<RawBatch, FetchError>;
}
