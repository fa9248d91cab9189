//! Harvest Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the Harvest workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `HarvestError` and the crate `Result` alias
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Types**: `PartitionKey` and the `strd_dt` / `ins_dt` stamp helpers
//!
//! # Example
//!
//! ```no_run
//! use harvest_common::types::PartitionKey;
//! use harvest_common::Result;
//!
//! fn key_for(source: &str, date: &str) -> Result<PartitionKey> {
//!     PartitionKey::new(source, date)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{HarvestError, Result};
pub use types::PartitionKey;
