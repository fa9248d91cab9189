//! Collector configuration
//!
//! Everything is read from the environment (after `.env` is loaded by the
//! binary). Unset variables take the defaults below; numeric values that fail
//! to parse also fall back to their default.

use std::time::Duration;
use thiserror::Error;

use crate::db::{DbConfig, DbError};
use crate::ingest::framework::pipeline::PipelineSettings;
use crate::ingest::framework::storage::CommitMode;
use crate::ingest::framework::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

pub const DEFAULT_MARKET_API_URL: &str = "http://localhost:8000/market/indices/{symbol}";
pub const DEFAULT_STOCK_PAGE_URL: &str = "https://finance.naver.com/item/main.naver";
pub const DEFAULT_STOCK_CODES: &[&str] = &["035720", "005930", "379780", "433330", "418660"];
pub const DEFAULT_EV_PORTAL_URL: &str =
    "https://ev.or.kr/nportal/buySupprt/initSubsidyPaymentCurrentStatus.do";
pub const DEFAULT_KMA_API_URL: &str =
    "https://apihub.kma.go.kr/api/typ02/openApi/VilageFcstInfoService_2.0/getUltraSrtNcst";
pub const DEFAULT_KMA_NX: i64 = 55;
pub const DEFAULT_KMA_NY: i64 = 127;
pub const DEFAULT_SEOUL_API_URL: &str = "http://openapi.seoul.go.kr:8088";
pub const DEFAULT_SEOUL_API_KEY: &str = "sample";
pub const DEFAULT_JEJU_API_URL: &str =
    "https://open.jejudatahub.net/api/proxy/Daaa1t3at3tt8a8DD3t55538t35Dab1t";
pub const DEFAULT_JEJU_REGIONS: &[&str] = &["아라동", "연동", "화북동", "삼양동", "노형동", "애월읍"];
pub const DEFAULT_NAVER_BLOG_API_URL: &str = "https://openapi.naver.com/v1/search/blog.json";
pub const DEFAULT_NAVER_BLOG_KEYWORD: &str = "시흥대야역맛집";
pub const DEFAULT_NAVER_BLOG_STRIP: &[&str] = &["시흥대야역", "시흥대야", "맛집"];
pub const DEFAULT_AIRFLOW_CONTAINER: &str = "airflow-scheduler";
pub const DEFAULT_AIRFLOW_DAG_ID: &str = "dags_bash_operator";
pub const DEFAULT_DOCKER_PROGRAM: &str = "docker";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

/// Upstream endpoints and per-source parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcesConfig {
    /// JSON endpoint for daily index bars; `{symbol}` is filled per feed.
    pub market_api_url: String,
    pub stock_page_url: String,
    pub stock_codes: Vec<String>,
    pub ev_portal_url: String,
    pub kma_api_url: String,
    pub kma_api_key: Option<String>,
    pub kma_nx: i64,
    pub kma_ny: i64,
    /// Seoul open-data base URL; the key and row range go in the path.
    pub seoul_api_url: String,
    pub seoul_api_key: String,
    pub jeju_api_url: String,
    pub jeju_api_key: Option<String>,
    /// One feed per district (`emd`).
    pub jeju_regions: Vec<String>,
    pub naver_blog_api_url: String,
    pub naver_client_id: Option<String>,
    pub naver_client_secret: Option<String>,
    pub naver_blog_keyword: String,
    /// Terms removed from snippets before they become titles.
    pub naver_blog_strip: Vec<String>,
    pub airflow_container: String,
    pub airflow_dag_id: String,
    pub docker_program: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            market_api_url: DEFAULT_MARKET_API_URL.to_string(),
            stock_page_url: DEFAULT_STOCK_PAGE_URL.to_string(),
            stock_codes: DEFAULT_STOCK_CODES.iter().map(|s| s.to_string()).collect(),
            ev_portal_url: DEFAULT_EV_PORTAL_URL.to_string(),
            kma_api_url: DEFAULT_KMA_API_URL.to_string(),
            kma_api_key: None,
            kma_nx: DEFAULT_KMA_NX,
            kma_ny: DEFAULT_KMA_NY,
            seoul_api_url: DEFAULT_SEOUL_API_URL.to_string(),
            seoul_api_key: DEFAULT_SEOUL_API_KEY.to_string(),
            jeju_api_url: DEFAULT_JEJU_API_URL.to_string(),
            jeju_api_key: None,
            jeju_regions: DEFAULT_JEJU_REGIONS.iter().map(|s| s.to_string()).collect(),
            naver_blog_api_url: DEFAULT_NAVER_BLOG_API_URL.to_string(),
            naver_client_id: None,
            naver_client_secret: None,
            naver_blog_keyword: DEFAULT_NAVER_BLOG_KEYWORD.to_string(),
            naver_blog_strip: DEFAULT_NAVER_BLOG_STRIP.iter().map(|s| s.to_string()).collect(),
            airflow_container: DEFAULT_AIRFLOW_CONTAINER.to_string(),
            airflow_dag_id: DEFAULT_AIRFLOW_DAG_ID.to_string(),
            docker_program: DEFAULT_DOCKER_PROGRAM.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database: DbConfig,
    pub max_attempts: usize,
    pub retry_pause_ms: u64,
    pub commit_mode: CommitMode,
    pub concurrency: usize,
    pub http_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub user_agent: String,
    pub sources: SourcesConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DbConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_pause_ms: 0,
            commit_mode: CommitMode::Atomic,
            concurrency: 1,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            sources: SourcesConfig::default(),
        }
    }
}

fn list(value: Option<String>, default: Vec<String>) -> Vec<String> {
    match value {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => default,
    }
}

fn secret(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl IngestConfig {
    /// Load from environment variables and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source and validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let source_defaults = SourcesConfig::default();

        let commit_mode = match lookup("HARVEST_COMMIT_MODE") {
            Some(mode) => mode.parse().map_err(|e: anyhow::Error| ConfigError::Invalid {
                name: "HARVEST_COMMIT_MODE",
                reason: e.to_string(),
            })?,
            None => defaults.commit_mode,
        };

        let sources = SourcesConfig {
            market_api_url: lookup("MARKET_API_URL").unwrap_or(source_defaults.market_api_url),
            stock_page_url: lookup("STOCK_PAGE_URL").unwrap_or(source_defaults.stock_page_url),
            stock_codes: list(lookup("STOCK_CODES"), source_defaults.stock_codes),
            ev_portal_url: lookup("EV_PORTAL_URL").unwrap_or(source_defaults.ev_portal_url),
            kma_api_url: lookup("KMA_API_URL").unwrap_or(source_defaults.kma_api_url),
            kma_api_key: secret(lookup("KMA_API_KEY")),
            kma_nx: parsed(lookup("KMA_NX"), source_defaults.kma_nx),
            kma_ny: parsed(lookup("KMA_NY"), source_defaults.kma_ny),
            seoul_api_url: lookup("SEOUL_API_URL").unwrap_or(source_defaults.seoul_api_url),
            seoul_api_key: secret(lookup("SEOUL_API_KEY")).unwrap_or(source_defaults.seoul_api_key),
            jeju_api_url: lookup("JEJU_API_URL").unwrap_or(source_defaults.jeju_api_url),
            jeju_api_key: secret(lookup("JEJU_API_KEY")),
            jeju_regions: list(lookup("JEJU_REGIONS"), source_defaults.jeju_regions),
            naver_blog_api_url: lookup("NAVER_BLOG_API_URL")
                .unwrap_or(source_defaults.naver_blog_api_url),
            naver_client_id: secret(lookup("NAVER_CLIENT_ID")),
            naver_client_secret: secret(lookup("NAVER_CLIENT_SECRET")),
            naver_blog_keyword: lookup("NAVER_BLOG_KEYWORD")
                .unwrap_or(source_defaults.naver_blog_keyword),
            naver_blog_strip: list(lookup("NAVER_BLOG_STRIP"), source_defaults.naver_blog_strip),
            airflow_container: lookup("AIRFLOW_CONTAINER")
                .unwrap_or(source_defaults.airflow_container),
            airflow_dag_id: lookup("AIRFLOW_DAG_ID").unwrap_or(source_defaults.airflow_dag_id),
            docker_program: lookup("DOCKER_PROGRAM").unwrap_or(source_defaults.docker_program),
        };

        let config = Self {
            database: DbConfig::from_lookup(&lookup)?,
            max_attempts: parsed(lookup("HARVEST_MAX_ATTEMPTS"), defaults.max_attempts),
            retry_pause_ms: parsed(lookup("HARVEST_RETRY_PAUSE_MS"), defaults.retry_pause_ms),
            commit_mode,
            concurrency: parsed(lookup("HARVEST_CONCURRENCY"), defaults.concurrency),
            http_timeout_secs: parsed(lookup("HARVEST_HTTP_TIMEOUT_SECS"), defaults.http_timeout_secs),
            command_timeout_secs: parsed(
                lookup("HARVEST_COMMAND_TIMEOUT_SECS"),
                defaults.command_timeout_secs,
            ),
            user_agent: lookup("HARVEST_USER_AGENT").unwrap_or(defaults.user_agent),
            sources,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "HARVEST_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Validation(
                "HARVEST_CONCURRENCY must be greater than 0".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "HARVEST_HTTP_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "HARVEST_COMMAND_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("MARKET_API_URL", &self.sources.market_api_url),
            ("STOCK_PAGE_URL", &self.sources.stock_page_url),
            ("EV_PORTAL_URL", &self.sources.ev_portal_url),
            ("KMA_API_URL", &self.sources.kma_api_url),
            ("SEOUL_API_URL", &self.sources.seoul_api_url),
            ("JEJU_API_URL", &self.sources.jeju_api_url),
            ("NAVER_BLOG_API_URL", &self.sources.naver_blog_api_url),
            ("NAVER_BLOG_KEYWORD", &self.sources.naver_blog_keyword),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
            }
        }

        if self.sources.airflow_dag_id.trim().is_empty() {
            return Err(ConfigError::Validation("AIRFLOW_DAG_ID cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_attempts: self.max_attempts,
            retry_pause: Duration::from_millis(self.retry_pause_ms),
            commit_mode: self.commit_mode,
            concurrency: self.concurrency,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<IngestConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.command_timeout_secs, 60);
        assert_eq!(config.commit_mode, CommitMode::Atomic);
        assert_eq!(config.sources.stock_codes.len(), 5);
        assert_eq!(config.sources.kma_nx, 55);
        assert_eq!(config.sources.airflow_container, "airflow-scheduler");
        assert!(config.sources.kma_api_key.is_none());
        assert_eq!(config.sources.seoul_api_key, "sample");
        assert_eq!(config.sources.jeju_regions.len(), 6);
        assert!(config.sources.naver_client_id.is_none());
        assert_eq!(config.sources.naver_blog_strip, vec!["시흥대야역", "시흥대야", "맛집"]);
    }

    #[test]
    fn test_new_source_overrides() {
        let config = load(&[
            ("SEOUL_API_KEY", "seoul-key"),
            ("JEJU_API_KEY", " "),
            ("JEJU_REGIONS", "연동, 노형동"),
            ("NAVER_CLIENT_ID", "id"),
            ("NAVER_CLIENT_SECRET", "secret"),
            ("NAVER_BLOG_KEYWORD", "제주맛집"),
            ("NAVER_BLOG_STRIP", "제주,맛집"),
        ])
        .unwrap();
        assert_eq!(config.sources.seoul_api_key, "seoul-key");
        assert!(config.sources.jeju_api_key.is_none());
        assert_eq!(config.sources.jeju_regions, vec!["연동", "노형동"]);
        assert_eq!(config.sources.naver_client_id.as_deref(), Some("id"));
        assert_eq!(config.sources.naver_blog_keyword, "제주맛집");
        assert_eq!(config.sources.naver_blog_strip, vec!["제주", "맛집"]);

        assert!(matches!(
            load(&[("NAVER_BLOG_KEYWORD", "")]),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HARVEST_MAX_ATTEMPTS", "3"),
            ("HARVEST_COMMIT_MODE", "two_phase"),
            ("STOCK_CODES", "005930, 000660,,"),
            ("KMA_API_KEY", "secret"),
            ("KMA_NX", "60"),
            ("HARVEST_HTTP_TIMEOUT_SECS", "abc"),
        ])
        .unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.commit_mode, CommitMode::TwoPhase);
        assert_eq!(config.sources.stock_codes, vec!["005930", "000660"]);
        assert_eq!(config.sources.kma_api_key.as_deref(), Some("secret"));
        assert_eq!(config.sources.kma_nx, 60);
        assert_eq!(config.http_timeout_secs, 30);

        let settings = config.pipeline_settings();
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.commit_mode, CommitMode::TwoPhase);
    }

    #[test]
    fn test_validation_failures() {
        assert!(matches!(
            load(&[("HARVEST_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            load(&[("HARVEST_COMMAND_TIMEOUT_SECS", "0")]),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            load(&[("EV_PORTAL_URL", "  ")]),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            load(&[("HARVEST_COMMIT_MODE", "sometimes")]),
            Err(ConfigError::Invalid { name: "HARVEST_COMMIT_MODE", .. })
        ));
    }
}
