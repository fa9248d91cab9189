//! End-to-end pipeline tests against an in-memory database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::NaiveDate;
use harvest_common::PartitionKey;
use harvest_ingest::db::connect_in_memory;
use harvest_ingest::ingest::error::FetchError;
use harvest_ingest::ingest::framework::adapter::{AdapterKind, SourceAdapter};
use harvest_ingest::ingest::framework::controller::CandidateStrategy;
use harvest_ingest::ingest::framework::schema::{ColumnSpec, DatasetSchema};
use harvest_ingest::ingest::framework::source::{Feed, SourceDefinition};
use harvest_ingest::ingest::framework::storage::CommitMode;
use harvest_ingest::ingest::framework::types::{
    AcquireParams, FieldValue, RawBatch, RawRecord, RunStatus,
};
use harvest_ingest::ingest::{CollectionPipeline, PipelineSettings, RunContext, SourceRegistry};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Reply = Result<Vec<RawRecord>, String>;

/// Replies from a queue; once the queue is empty every call fails.
struct ScriptedAdapter {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::RestCall
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn acquire(&self, params: &AcquireParams) -> Result<RawBatch, FetchError> {
        self.calls.lock().unwrap().push(params.label());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(records)) => Ok(RawBatch::live(records)),
            Some(Err(reason)) => Err(FetchError::Other(reason)),
            None => Err(FetchError::Other("script exhausted".to_string())),
        }
    }
}

fn market_schema() -> DatasetSchema {
    DatasetSchema::stamped(
        "market",
        vec![
            ColumnSpec::text("market"),
            ColumnSpec::float("close").alias("Close"),
            ColumnSpec::integer("volume").alias("Volume"),
        ],
    )
    .unwrap()
}

fn bars(market: &str, first_close: f64) -> Vec<RawRecord> {
    (0..5)
        .map(|i| {
            json!({
                "market": market,
                "Close": first_close + f64::from(i),
                "Volume": format!("{},000", i + 1),
            })
            .as_object()
            .cloned()
            .unwrap()
        })
        .collect()
}

fn friday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
}

fn ctx(stamp: &str) -> RunContext {
    RunContext::fixed(friday(), stamp)
}

fn market_key() -> PartitionKey {
    PartitionKey::new("market", "20240105").unwrap()
}

fn pipeline_with(pool: SqlitePool, source: SourceDefinition, mode: CommitMode) -> CollectionPipeline {
    let settings = PipelineSettings {
        commit_mode: mode,
        ..PipelineSettings::default()
    };
    CollectionPipeline::new(pool, SourceRegistry::new().with(source), settings)
}

fn single_market(adapter: Arc<ScriptedAdapter>, strategy: CandidateStrategy) -> SourceDefinition {
    SourceDefinition::single("market", "test market", market_schema(), adapter, strategy)
}

#[tokio::test]
async fn test_second_run_replaces_first() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(vec![Ok(bars("KOSPI", 100.0)), Ok(bars("KOSPI", 200.0))]);
    let pipeline = pipeline_with(
        pool,
        single_market(adapter.clone(), CandidateStrategy::Single),
        CommitMode::Atomic,
    );

    let first = pipeline.run_with_context("market", &ctx("20240105090000")).await;
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(first.count, 5);

    let second = pipeline.run_with_context("market", &ctx("20240105100000")).await;
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.count, 5);

    let rows = pipeline.store().load_partition(&market_key()).await.unwrap();
    assert_eq!(rows.len(), 5);
    let closes: Vec<f64> = rows
        .iter()
        .map(|r| r.get("close").and_then(FieldValue::as_f64).unwrap())
        .collect();
    assert_eq!(closes, vec![200.0, 201.0, 202.0, 203.0, 204.0]);
    assert_eq!(
        rows[0].get("ingested_at"),
        Some(&FieldValue::text("20240105100000"))
    );
    assert_eq!(rows[0].get("partition_date"), Some(&FieldValue::text("20240105")));
    assert_eq!(rows[1].get("volume"), Some(&FieldValue::Integer(2000)));
}

#[tokio::test]
async fn test_identical_runs_are_idempotent() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(vec![Ok(bars("KOSPI", 10.0)), Ok(bars("KOSPI", 10.0))]);
    let pipeline = pipeline_with(
        pool,
        single_market(adapter, CandidateStrategy::Single),
        CommitMode::Atomic,
    );
    let fixed = ctx("20240105120000");

    pipeline.run_with_context("market", &fixed).await;
    let once = pipeline.store().load_partition(&market_key()).await.unwrap();
    let ledger_once = pipeline.ledger().fetch(&market_key()).await.unwrap();

    pipeline.run_with_context("market", &fixed).await;
    let twice = pipeline.store().load_partition(&market_key()).await.unwrap();
    let ledger_twice = pipeline.ledger().fetch(&market_key()).await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(ledger_once, ledger_twice);
}

#[tokio::test]
async fn test_walkback_skips_empty_days_and_logs_success() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(vec![
        Ok(Vec::new()),
        Err("HTTP 503".to_string()),
        Ok(bars("KOSPI", 1.0)),
    ]);
    let pipeline = pipeline_with(
        pool,
        single_market(
            adapter.clone(),
            CandidateStrategy::BusinessDayWalkback { offset: 0, steps: 5 },
        ),
        CommitMode::Atomic,
    );

    // Monday 2024-01-08: tries Monday, then Friday, then Thursday.
    let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
    let outcome = pipeline
        .run_with_context("market", &RunContext::fixed(monday, "20240108080000"))
        .await;

    assert!(outcome.is_success());
    assert_eq!(adapter.calls(), vec!["20240108", "20240105", "20240104"]);
    assert!(outcome.message.contains("20240104"), "{}", outcome.message);

    let key = PartitionKey::new("market", "20240108").unwrap();
    let entry = pipeline.ledger().fetch(&key).await.unwrap().unwrap();
    assert_eq!(entry.status, RunStatus::Success);
    assert_eq!(entry.record_count, 5);
    assert_eq!(entry.ingested_at, "20240108080000");
}

#[tokio::test]
async fn test_exhaustion_keeps_previous_rows_and_records_error() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(vec![Ok(bars("KOSPI", 50.0))]);
    let pipeline = pipeline_with(
        pool,
        single_market(
            adapter.clone(),
            CandidateStrategy::BusinessDayWalkback { offset: 0, steps: 8 },
        ),
        CommitMode::Atomic,
    );

    assert!(pipeline.run_with_context("market", &ctx("20240105090000")).await.is_success());

    // Script is now empty: every attempt fails, capped at the default of 5.
    let calls_before = adapter.calls().len();
    let outcome = pipeline.run_with_context("market", &ctx("20240105100000")).await;
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.count, 0);
    assert!(outcome.message.contains("exhausted after 5 attempt(s)"), "{}", outcome.message);
    assert_eq!(adapter.calls().len() - calls_before, 5);

    assert_eq!(pipeline.store().count_partition(&market_key()).await.unwrap(), 5);
    let entry = pipeline.ledger().fetch(&market_key()).await.unwrap().unwrap();
    assert_eq!(entry.status, RunStatus::Error);
    assert_eq!(entry.record_count, 0);
    assert_eq!(entry.ingested_at, "20240105100000");
}

#[tokio::test]
async fn test_unknown_source_touches_nothing() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(Vec::new());
    let pipeline = pipeline_with(
        pool.clone(),
        single_market(adapter, CandidateStrategy::Single),
        CommitMode::Atomic,
    );

    let outcome = pipeline.run_with_context("nope", &ctx("20240105090000")).await;
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.message, "unknown source 'nope'");

    let runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collection_runs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(runs, 0);
}

#[tokio::test]
async fn test_malformed_stamp_is_rejected_before_any_write() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(vec![Ok(bars("KOSPI", 1.0))]);
    let pipeline = pipeline_with(
        pool.clone(),
        single_market(adapter.clone(), CandidateStrategy::Single),
        CommitMode::Atomic,
    );

    let outcome = pipeline
        .run_with_context("market", &RunContext::fixed(friday(), "2024-01-05 10:00"))
        .await;
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.count, 0);
    assert!(outcome.message.contains("2024-01-05 10:00"), "{}", outcome.message);

    assert!(adapter.calls().is_empty());
    assert_eq!(pipeline.store().count_partition(&market_key()).await.unwrap(), 0);
    assert!(pipeline.ledger().fetch(&market_key()).await.unwrap().is_none());

    // A valid stamp afterwards runs normally and is ledgered.
    let outcome = pipeline.run_with_context("market", &ctx("20240105100000")).await;
    assert!(outcome.is_success(), "{}", outcome.message);
    let entry = pipeline.ledger().fetch(&market_key()).await.unwrap().unwrap();
    assert_eq!(entry.status, RunStatus::Success);
}

#[tokio::test]
async fn test_partial_feed_failure_is_reported() {
    let pool = connect_in_memory().await.unwrap();
    let kospi = ScriptedAdapter::new(vec![Ok(bars("ignored", 1.0))]);
    let nasdaq = ScriptedAdapter::new(Vec::new());

    let source = SourceDefinition::new("market", "two feeds", market_schema())
        .feed(Feed::new("KOSPI", kospi, CandidateStrategy::Single).constant("market", "KOSPI"))
        .feed(
            Feed::new(
                "NASDAQ",
                nasdaq.clone(),
                CandidateStrategy::BusinessDayWalkback { offset: 1, steps: 3 },
            )
            .constant("market", "NASDAQ"),
        );
    let pipeline = pipeline_with(pool, source, CommitMode::Atomic);

    let outcome = pipeline.run_with_context("market", &ctx("20240105090000")).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.count, 5);
    assert!(outcome.message.contains("exhausted feeds: NASDAQ"), "{}", outcome.message);
    assert_eq!(nasdaq.calls(), vec!["20240104", "20240103", "20240102"]);

    // Upstream values win over feed constants.
    let rows = pipeline.store().load_partition(&market_key()).await.unwrap();
    assert_eq!(rows[0].get("market"), Some(&FieldValue::text("ignored")));
}

#[tokio::test]
async fn test_all_feeds_exhausted_lists_every_attempt() {
    let pool = connect_in_memory().await.unwrap();
    let a = ScriptedAdapter::new(vec![Err("down".to_string())]);
    let b = ScriptedAdapter::new(vec![Ok(Vec::new())]);
    let source = SourceDefinition::new("market", "two feeds", market_schema())
        .feed(Feed::new("A", a, CandidateStrategy::Single))
        .feed(Feed::new("B", b, CandidateStrategy::Single));
    let pipeline = pipeline_with(pool, source, CommitMode::Atomic);

    let outcome = pipeline.run_with_context("market", &ctx("20240105090000")).await;
    assert_eq!(outcome.status, RunStatus::Error);
    assert!(outcome.message.contains("A:20240105"), "{}", outcome.message);
    assert!(outcome.message.contains("B:20240105"), "{}", outcome.message);
}

async fn poison_inserts(pool: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TRIGGER poison_insert BEFORE INSERT ON collected_records
        WHEN NEW.payload LIKE '%POISON%'
        BEGIN
            SELECT RAISE(ABORT, 'poisoned row');
        END
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_atomic_insert_failure_keeps_previous_generation() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(vec![Ok(bars("KOSPI", 1.0)), Ok(bars("POISON", 2.0))]);
    let pipeline = pipeline_with(
        pool.clone(),
        single_market(adapter, CandidateStrategy::Single),
        CommitMode::Atomic,
    );

    assert!(pipeline.run_with_context("market", &ctx("20240105090000")).await.is_success());
    poison_inserts(&pool).await;

    let outcome = pipeline.run_with_context("market", &ctx("20240105100000")).await;
    assert_eq!(outcome.status, RunStatus::Error);
    assert!(outcome.message.contains("inserting"), "{}", outcome.message);

    let rows = pipeline.store().load_partition(&market_key()).await.unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].get("market"), Some(&FieldValue::text("KOSPI")));
    let entry = pipeline.ledger().fetch(&market_key()).await.unwrap().unwrap();
    assert_eq!(entry.status, RunStatus::Error);
}

#[tokio::test]
async fn test_two_phase_insert_failure_reports_cleared_partition() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(vec![Ok(bars("KOSPI", 1.0)), Ok(bars("POISON", 2.0))]);
    let pipeline = pipeline_with(
        pool.clone(),
        single_market(adapter, CandidateStrategy::Single),
        CommitMode::TwoPhase,
    );

    assert!(pipeline.run_with_context("market", &ctx("20240105090000")).await.is_success());
    poison_inserts(&pool).await;

    let outcome = pipeline.run_with_context("market", &ctx("20240105100000")).await;
    assert_eq!(outcome.status, RunStatus::Error);
    assert!(outcome.message.contains("was cleared (5 rows deleted)"), "{}", outcome.message);
    assert_eq!(pipeline.store().count_partition(&market_key()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_run_all_reports_every_source_in_name_order() {
    let pool = connect_in_memory().await.unwrap();
    let good = ScriptedAdapter::new(vec![Ok(bars("KOSPI", 1.0))]);
    let bad = ScriptedAdapter::new(Vec::new());

    let registry = SourceRegistry::new()
        .with(SourceDefinition::single(
            "zeta",
            "fails",
            market_schema(),
            bad,
            CandidateStrategy::Single,
        ))
        .with(SourceDefinition::single(
            "alpha",
            "works",
            market_schema(),
            good,
            CandidateStrategy::Single,
        ));
    let settings = PipelineSettings {
        concurrency: 2,
        ..PipelineSettings::default()
    };
    let pipeline = CollectionPipeline::new(pool, registry, settings);

    let outcomes = pipeline.run_all(&ctx("20240105090000")).await;
    let summary: Vec<(&str, RunStatus)> = outcomes
        .iter()
        .map(|(name, outcome)| (name.as_str(), outcome.status))
        .collect();
    assert_eq!(summary, vec![("alpha", RunStatus::Success), ("zeta", RunStatus::Error)]);

    let entries = pipeline.ledger().list_for_date("20240105").await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].source_name, "alpha");
}

#[tokio::test]
async fn test_concurrent_runs_for_one_key_do_not_interleave() {
    let pool = connect_in_memory().await.unwrap();
    let adapter = ScriptedAdapter::new(Vec::new());
    for i in 0..4 {
        adapter.push(Ok(bars("KOSPI", f64::from(i) * 100.0)));
    }
    let pipeline = Arc::new(pipeline_with(
        pool,
        single_market(adapter, CandidateStrategy::Single),
        CommitMode::TwoPhase,
    ));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .run_with_context("market", &ctx(&format!("2024010509000{}", i)))
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    assert_eq!(pipeline.store().count_partition(&market_key()).await.unwrap(), 5);
}
