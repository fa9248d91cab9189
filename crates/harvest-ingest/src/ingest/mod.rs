//! Collection pipeline
//!
//! - [`framework`]: the source-independent machinery (controller, normalizer,
//!   partition store, run ledger, pipeline)
//! - [`adapters`]: the page, REST and command-exec adapter families
//! - [`sources`]: the built-in catalogue wired from configuration

pub mod adapters;
pub mod error;
pub mod framework;
pub mod sources;

pub use error::{FetchError, NormalizationError, PersistenceError, SchemaError, SourceExhausted};
pub use framework::{CollectionPipeline, PipelineSettings, RunContext, SourceRegistry};
pub use sources::{builtin_registry, builtin_registry_with};
