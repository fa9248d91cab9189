//! Generic collection framework
//!
//! Source-agnostic pieces shared by every collector:
//!
//! - **Adapter**: one acquisition attempt against an upstream
//! - **Controller**: candidate generation and bounded retry
//! - **Normalizer**: raw fields to schema-ordered typed values
//! - **Storage**: replace-by-partition writes
//! - **Ledger**: one outcome row per partition
//! - **Pipeline**: ties the above together per run

pub mod adapter;
pub mod controller;
pub mod ledger;
pub mod normalizer;
pub mod pipeline;
pub mod registry;
pub mod run;
pub mod schema;
pub mod source;
pub mod storage;
pub mod types;

pub use adapter::{AdapterKind, SourceAdapter};
pub use controller::{business_day, Acquired, CandidateStrategy, RetryController, DEFAULT_MAX_ATTEMPTS};
pub use ledger::{truncate_message, LedgerEntry, RunLedger, MESSAGE_CAP};
pub use normalizer::{normalize, normalize_record, parse_bracket_values};
pub use pipeline::{CollectionPipeline, PipelineSettings, RunContext};
pub use registry::SourceRegistry;
pub use run::{CollectionRun, IllegalTransition, RunState};
pub use schema::{ColumnKind, ColumnSpec, DatasetSchema};
pub use source::{Feed, SourceDefinition};
pub use storage::{CommitMode, PartitionStore};
pub use types::{
    AcquireParams, AttemptOutcome, AttemptRecord, CanonicalRecord, CollectionOutcome, FieldValue,
    RawBatch, RawRecord, RunStatus,
};
