//! Airflow DAG trigger via the scheduler container.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SourcesConfig;
use crate::ingest::adapters::{CommandExecAdapter, ContainerRuntime, MatchRule};
use crate::ingest::error::SchemaError;
use crate::ingest::framework::controller::CandidateStrategy;
use crate::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use crate::ingest::framework::source::{Feed, SourceDefinition};

pub const NAME: &str = "airflow_dag";

pub fn schema() -> Result<DatasetSchema, SchemaError> {
    DatasetSchema::stamped(
        NAME,
        vec![
            ColumnSpec::text("dag_id"),
            ColumnSpec::text("target"),
            ColumnSpec::text("command"),
            ColumnSpec::integer("exit_code"),
            ColumnSpec::text("output"),
        ],
    )
}

pub fn adapter(
    runtime: Arc<dyn ContainerRuntime>,
    sources: &SourcesConfig,
    timeout: Duration,
) -> CommandExecAdapter {
    let command = vec![
        "airflow".to_string(),
        "dags".to_string(),
        "trigger".to_string(),
        sources.airflow_dag_id.clone(),
    ];
    CommandExecAdapter::new(runtime, command, timeout)
        .rule(MatchRule::ExactName(sources.airflow_container.clone()))
        .rule(MatchRule::NameContains("airflow".to_string()))
        .rule(MatchRule::ImageContains("airflow".to_string()))
        .rule(MatchRule::Probe(vec!["airflow".to_string(), "version".to_string()]))
}

pub fn definition(
    runtime: Arc<dyn ContainerRuntime>,
    sources: &SourcesConfig,
    timeout: Duration,
) -> Result<SourceDefinition, SchemaError> {
    let feed = Feed::new(
        NAME,
        Arc::new(adapter(runtime, sources, timeout)),
        CandidateStrategy::Single,
    )
    .constant("dag_id", sources.airflow_dag_id.as_str());

    Ok(SourceDefinition::new(NAME, "Trigger the configured Airflow DAG", schema()?).feed(feed))
}
