//! Command-execution adapter
//!
//! Picks a container by ranked rules, runs one command inside it and turns the
//! result into a single record. Target selection order:
//!
//! 1. exact name match
//! 2. name substring, then image substring
//! 3. capability probe: the first container where the probe command exits 0
//!
//! When nothing qualifies the error lists every rule and probe that was tried.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::ingest::error::FetchError;
use crate::ingest::framework::adapter::{AdapterKind, SourceAdapter};
use crate::ingest::framework::types::{AcquireParams, RawBatch, RawRecord};

/// A running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub id: String,
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// stdout followed by stderr
    pub output: String,
}

/// Something that can list containers and exec into them.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<ExecTarget>, FetchError>;

    async fn exec(
        &self,
        target: &ExecTarget,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, FetchError>;
}

/// `docker` CLI backed runtime.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    list_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            list_timeout: Duration::from_secs(15),
        }
    }

    async fn run(&self, args: &[String], timeout: Duration, target: &str) -> Result<ExecOutput, FetchError> {
        let result = tokio::time::timeout(
            timeout,
            Command::new(&self.program)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                Ok(ExecOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    output: text,
                })
            },
            Ok(Err(source)) => Err(FetchError::Spawn {
                program: self.program.clone(),
                source,
            }),
            Err(_) => Err(FetchError::Timeout {
                target: target.to_string(),
                secs: timeout.as_secs(),
            }),
        }
    }
}

/// Parse `docker ps --format '{{.ID}}\t{{.Names}}\t{{.Image}}'` output.
pub fn parse_container_listing(listing: &str) -> Vec<ExecTarget> {
    listing
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let id = parts.next()?.trim();
            let name = parts.next()?.trim();
            let image = parts.next().unwrap_or("").trim();
            if id.is_empty() || name.is_empty() {
                return None;
            }
            Some(ExecTarget {
                id: id.to_string(),
                name: name.to_string(),
                image: image.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_targets(&self) -> Result<Vec<ExecTarget>, FetchError> {
        let args: Vec<String> = ["ps", "--format", "{{.ID}}\t{{.Names}}\t{{.Image}}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = self.run(&args, self.list_timeout, "docker ps").await?;
        if output.exit_code != 0 {
            return Err(FetchError::CommandFailed {
                target: "docker ps".to_string(),
                code: output.exit_code,
                output: output.output.trim().to_string(),
            });
        }
        Ok(parse_container_listing(&output.output))
    }

    async fn exec(
        &self,
        target: &ExecTarget,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, FetchError> {
        let mut args = vec!["exec".to_string(), target.id.clone()];
        args.extend(command.iter().cloned());
        self.run(&args, timeout, &target.name).await
    }
}

/// One target-selection rule, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    ExactName(String),
    NameContains(String),
    ImageContains(String),
    /// Run this command in each container; the first exit 0 wins.
    Probe(Vec<String>),
}

impl std::fmt::Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchRule::ExactName(name) => write!(f, "name == '{}'", name),
            MatchRule::NameContains(part) => write!(f, "name contains '{}'", part),
            MatchRule::ImageContains(part) => write!(f, "image contains '{}'", part),
            MatchRule::Probe(command) => write!(f, "probe '{}'", command.join(" ")),
        }
    }
}

pub struct CommandExecAdapter {
    runtime: Arc<dyn ContainerRuntime>,
    rules: Vec<MatchRule>,
    command: Vec<String>,
    timeout: Duration,
    probe_timeout: Duration,
}

impl CommandExecAdapter {
    /// `command` entries may use `{base_date}` style placeholders.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            runtime,
            rules: Vec::new(),
            command,
            timeout,
            probe_timeout: Duration::from_secs(10),
        }
    }

    pub fn rule(mut self, rule: MatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Apply the rules in order against the current container list.
    pub async fn resolve_target(&self) -> Result<ExecTarget, FetchError> {
        let targets = self.runtime.list_targets().await?;
        let mut tried = Vec::new();

        for rule in &self.rules {
            let found = match rule {
                MatchRule::ExactName(name) => targets.iter().find(|t| &t.name == name).cloned(),
                MatchRule::NameContains(part) => {
                    let part = part.to_lowercase();
                    targets
                        .iter()
                        .find(|t| t.name.to_lowercase().contains(&part))
                        .cloned()
                },
                MatchRule::ImageContains(part) => {
                    let part = part.to_lowercase();
                    targets
                        .iter()
                        .find(|t| t.image.to_lowercase().contains(&part))
                        .cloned()
                },
                MatchRule::Probe(command) => self.probe(&targets, command, &mut tried).await,
            };

            if let Some(target) = found {
                info!(target = %target.name, rule = %rule, "Selected execution target");
                return Ok(target);
            }
            tried.push(rule.to_string());
        }

        if targets.is_empty() {
            tried.push("no running containers".to_string());
        }
        Err(FetchError::NoTarget { tried })
    }

    async fn probe(
        &self,
        targets: &[ExecTarget],
        command: &[String],
        tried: &mut Vec<String>,
    ) -> Option<ExecTarget> {
        for target in targets {
            match self.runtime.exec(target, command, self.probe_timeout).await {
                Ok(output) if output.exit_code == 0 => return Some(target.clone()),
                Ok(output) => {
                    debug!(target = %target.name, code = output.exit_code, "Probe failed");
                    tried.push(format!("probe on {} exited {}", target.name, output.exit_code));
                },
                Err(e) => {
                    debug!(target = %target.name, "Probe error: {}", e);
                    tried.push(format!("probe on {}: {}", target.name, e));
                },
            }
        }
        None
    }
}

#[async_trait]
impl SourceAdapter for CommandExecAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::CommandExec
    }

    fn describe(&self) -> String {
        let rules: Vec<String> = self.rules.iter().map(|r| r.to_string()).collect();
        format!("exec '{}' via [{}]", self.command.join(" "), rules.join(", "))
    }

    async fn acquire(&self, params: &AcquireParams) -> Result<RawBatch, FetchError> {
        let target = self.resolve_target().await?;
        let command: Vec<String> = self.command.iter().map(|c| params.render(c)).collect();

        let output = self.runtime.exec(&target, &command, self.timeout).await?;
        if output.exit_code != 0 {
            warn!(target = %target.name, code = output.exit_code, "Command failed");
            return Err(FetchError::CommandFailed {
                target: target.name,
                code: output.exit_code,
                output: output.output.trim().to_string(),
            });
        }

        let mut record = RawRecord::new();
        record.insert("target".into(), Value::String(target.name));
        record.insert("command".into(), Value::String(command.join(" ")));
        record.insert("exit_code".into(), Value::from(output.exit_code));
        record.insert("output".into(), Value::String(output.output.trim().to_string()));
        Ok(RawBatch::live(vec![record]))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    /// In-memory runtime; `ok_probe` lists names where the probe exits 0.
    struct FakeRuntime {
        targets: Vec<ExecTarget>,
        ok_probe: Vec<String>,
        exit_code: i32,
        execs: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeRuntime {
        fn new(targets: &[(&str, &str)]) -> Self {
            Self {
                targets: targets
                    .iter()
                    .enumerate()
                    .map(|(i, (name, image))| ExecTarget {
                        id: format!("id{}", i),
                        name: name.to_string(),
                        image: image.to_string(),
                    })
                    .collect(),
                ok_probe: Vec::new(),
                exit_code: 0,
                execs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_targets(&self) -> Result<Vec<ExecTarget>, FetchError> {
            Ok(self.targets.clone())
        }

        async fn exec(
            &self,
            target: &ExecTarget,
            command: &[String],
            _timeout: Duration,
        ) -> Result<ExecOutput, FetchError> {
            self.execs
                .lock()
                .unwrap()
                .push((target.name.clone(), command.to_vec()));
            if command.first().map(String::as_str) == Some("probe") {
                let ok = self.ok_probe.contains(&target.name);
                return Ok(ExecOutput {
                    exit_code: if ok { 0 } else { 127 },
                    output: String::new(),
                });
            }
            Ok(ExecOutput {
                exit_code: self.exit_code,
                output: format!("ran {}\n", command.join(" ")),
            })
        }
    }

    fn adapter(runtime: FakeRuntime) -> CommandExecAdapter {
        CommandExecAdapter::new(
            Arc::new(runtime),
            vec!["trigger".into(), "{base_date}".into()],
            Duration::from_secs(5),
        )
        .rule(MatchRule::ExactName("airflow-scheduler".into()))
        .rule(MatchRule::NameContains("airflow".into()))
        .rule(MatchRule::ImageContains("airflow".into()))
        .rule(MatchRule::Probe(vec!["probe".into()]))
    }

    #[tokio::test]
    async fn test_exact_name_beats_substring() {
        let runtime = FakeRuntime::new(&[
            ("airflow-webserver", "apache/airflow:2.8"),
            ("airflow-scheduler", "apache/airflow:2.8"),
        ]);
        let target = adapter(runtime).resolve_target().await.unwrap();
        assert_eq!(target.name, "airflow-scheduler");
    }

    #[tokio::test]
    async fn test_substring_then_image() {
        let by_name = FakeRuntime::new(&[("postgres", "postgres:16"), ("my-Airflow-1", "custom")]);
        assert_eq!(adapter(by_name).resolve_target().await.unwrap().name, "my-Airflow-1");

        let by_image = FakeRuntime::new(&[("postgres", "postgres:16"), ("sched", "apache/airflow")]);
        assert_eq!(adapter(by_image).resolve_target().await.unwrap().name, "sched");
    }

    #[tokio::test]
    async fn test_probe_fallback_and_no_target() {
        let mut runtime = FakeRuntime::new(&[("web", "nginx"), ("worker", "python")]);
        runtime.ok_probe = vec!["worker".into()];
        assert_eq!(adapter(runtime).resolve_target().await.unwrap().name, "worker");

        let runtime = FakeRuntime::new(&[("web", "nginx")]);
        match adapter(runtime).resolve_target().await.unwrap_err() {
            FetchError::NoTarget { tried } => {
                assert_eq!(tried.len(), 5);
                assert!(tried[0].contains("airflow-scheduler"));
                assert!(tried.iter().any(|t| t.contains("probe on web exited 127")));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_listing_is_no_target() {
        let err = adapter(FakeRuntime::new(&[])).resolve_target().await.unwrap_err();
        assert!(err.to_string().contains("no running containers"));
    }

    #[tokio::test]
    async fn test_acquire_runs_rendered_command() {
        let params = AcquireParams::for_date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        let batch = adapter(FakeRuntime::new(&[("airflow-scheduler", "x")]))
            .acquire(&params)
            .await
            .unwrap();
        let record = &batch.records[0];
        assert_eq!(record["target"], "airflow-scheduler");
        assert_eq!(record["command"], "trigger 20240105");
        assert_eq!(record["exit_code"], 0);
        assert_eq!(record["output"], "ran trigger 20240105");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let mut runtime = FakeRuntime::new(&[("airflow-scheduler", "x")]);
        runtime.exit_code = 1;
        let params = AcquireParams::for_date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        let err = adapter(runtime).acquire(&params).await.unwrap_err();
        assert!(matches!(err, FetchError::CommandFailed { code: 1, .. }));
    }

    #[test]
    fn test_parse_container_listing() {
        let listing = "abc123\tairflow-scheduler\tapache/airflow:2.8.1\n\
                       def456\tpostgres\tpostgres:16\n\
                       \n\
                       broken-line\n";
        let targets = parse_container_listing(listing);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "airflow-scheduler");
        assert_eq!(targets[1].image, "postgres:16");
    }
}
