//! Harvest Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Date-partitioned collection from web pages, JSON APIs and container
//! commands into a single SQLite store.
//!
//! Each run acquires a source's records for one partition date (retrying
//! over candidate dates or publication slots), normalizes them onto the
//! source's schema, replaces the partition, and records the outcome in the
//! run ledger.
//!
//! # Example
//!
//! ```no_run
//! use harvest_ingest::config::IngestConfig;
//! use harvest_ingest::db::{create_pool, run_migrations};
//! use harvest_ingest::ingest::{builtin_registry, CollectionPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let pool = create_pool(&config.database).await?;
//!     run_migrations(&pool).await?;
//!
//!     let pipeline = CollectionPipeline::new(
//!         pool,
//!         builtin_registry(&config)?,
//!         config.pipeline_settings(),
//!     );
//!     let outcome = pipeline.run_collection("market_index").await;
//!     println!("{}: {}", outcome.status, outcome.message);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod ingest;
