//! Built-in source catalogue
//!
//! | source                     | adapter       | feeds                        |
//! |----------------------------|---------------|------------------------------|
//! | `market_index`             | REST          | one per index                |
//! | `stock_quote`              | page (fields) | one per stock code           |
//! | `ev_subsidy`               | page (table)  | one, with fallback doc       |
//! | `weather_nowcast`          | REST          | one, hourly slots            |
//! | `seoul_foreign_population` | REST, paged   | one, lagged calendar days    |
//! | `jeju_floating_population` | REST, paged   | one per district             |
//! | `naver_blog`               | REST, paged   | one, with fallback doc       |
//! | `airflow_dag`              | command exec  | one                          |

pub mod airflow;
pub mod ev;
pub mod jeju;
pub mod market;
pub mod naver_blog;
pub mod seoul;
pub mod stock;
pub mod weather;

use reqwest::Client;
use std::sync::Arc;
use thiserror::Error;

use crate::config::IngestConfig;
use crate::ingest::adapters::{build_http_client, ContainerRuntime, DockerCli};
use crate::ingest::error::{FetchError, SchemaError};
use crate::ingest::framework::registry::SourceRegistry;

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("Invalid source schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid adapter setup: {0}")]
    Adapter(#[from] FetchError),
}

/// Registry of every built-in source, wired to the configured endpoints.
pub fn builtin_registry(config: &IngestConfig) -> Result<SourceRegistry, CatalogueError> {
    let client = build_http_client(config.http_timeout(), &config.user_agent)?;
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerCli::new(config.sources.docker_program.clone()));
    builtin_registry_with(config, client, runtime)
}

/// Same as [`builtin_registry`] with an explicit HTTP client and container runtime.
pub fn builtin_registry_with(
    config: &IngestConfig,
    client: Client,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<SourceRegistry, CatalogueError> {
    let sources = &config.sources;
    let mut registry = SourceRegistry::new();
    registry
        .register(market::definition(client.clone(), &sources.market_api_url)?)
        .register(stock::definition(
            client.clone(),
            &sources.stock_page_url,
            &sources.stock_codes,
        )?)
        .register(ev::definition(client.clone(), &sources.ev_portal_url)?)
        .register(weather::definition(client.clone(), sources)?)
        .register(seoul::definition(client.clone(), sources)?)
        .register(jeju::definition(client.clone(), sources)?)
        .register(naver_blog::definition(client, sources)?)
        .register(airflow::definition(runtime, sources, config.command_timeout())?);
    Ok(registry)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogue() {
        let config = IngestConfig::default();
        let registry = builtin_registry(&config).unwrap();

        assert_eq!(
            registry.names(),
            vec![
                "airflow_dag",
                "ev_subsidy",
                "jeju_floating_population",
                "market_index",
                "naver_blog",
                "seoul_foreign_population",
                "stock_quote",
                "weather_nowcast",
            ]
        );
        assert_eq!(registry.get("market_index").unwrap().feeds.len(), 5);
        assert_eq!(
            registry.get("stock_quote").unwrap().feeds.len(),
            config.sources.stock_codes.len()
        );
        assert_eq!(
            registry.get("jeju_floating_population").unwrap().feeds.len(),
            config.sources.jeju_regions.len()
        );
    }

    #[test]
    fn test_every_schema_is_stamped() {
        let registry = builtin_registry(&IngestConfig::default()).unwrap();
        for source in registry.iter() {
            let columns = source.schema.column_names();
            assert_eq!(columns.first(), Some(&"partition_date"), "{}", source.name);
            assert_eq!(columns.last(), Some(&"ingested_at"), "{}", source.name);
        }
    }
}
