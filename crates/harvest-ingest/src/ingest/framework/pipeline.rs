//! Collection pipeline
//!
//! Drives one source through acquire -> normalize -> replace -> ledger for one
//! partition date. Runs for the same partition key are serialized; runs for
//! different keys proceed independently.
//!
//! The trigger surface is deliberately small:
//!
//! - [`CollectionPipeline::run_collection`]: today's partition
//! - [`CollectionPipeline::run_for_date`]: an explicit partition date
//! - [`CollectionPipeline::run_with_context`]: explicit date and `ins_dt`
//!
//! Every call returns a [`CollectionOutcome`] and never panics or errors; a
//! failed run is an `error` outcome with a message.

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use harvest_common::types::{ingested_at_now, parse_ingested_at, today};
use harvest_common::PartitionKey;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, info_span, warn, Instrument};

use super::controller::{RetryController, DEFAULT_MAX_ATTEMPTS};
use super::ledger::RunLedger;
use super::normalizer::normalize;
use super::registry::SourceRegistry;
use super::run::{CollectionRun, IllegalTransition, RunState};
use super::source::SourceDefinition;
use super::storage::{CommitMode, PartitionStore};
use super::types::{
    AttemptRecord, CollectionOutcome, RawBatch, INGESTED_AT_FIELD, PARTITION_DATE_FIELD,
};
use crate::ingest::error::{PersistenceError, SourceExhausted};

/// Knobs the pipeline takes from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_attempts: usize,
    pub retry_pause: Duration,
    pub commit_mode: CommitMode,
    /// Sources run at once by [`CollectionPipeline::run_all`].
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_pause: Duration::ZERO,
            commit_mode: CommitMode::Atomic,
            concurrency: 1,
        }
    }
}

/// The partition being collected and the `ins_dt` stamped on its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub partition_date: NaiveDate,
    pub ingested_at: String,
}

impl RunContext {
    /// Today's partition, stamped now.
    pub fn now() -> Self {
        Self::for_date(today())
    }

    /// `partition_date`, stamped now.
    pub fn for_date(partition_date: NaiveDate) -> Self {
        Self {
            partition_date,
            ingested_at: ingested_at_now(),
        }
    }

    /// Fixed date and stamp; repeated runs produce identical rows.
    pub fn fixed(partition_date: NaiveDate, ingested_at: impl Into<String>) -> Self {
        Self {
            partition_date,
            ingested_at: ingested_at.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RunFailure {
    #[error(transparent)]
    Exhausted(#[from] SourceExhausted),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Lifecycle(#[from] IllegalTransition),
}

/// Feed results merged into one batch.
#[derive(Debug, Default)]
struct Gathered {
    batch: RawBatch,
    succeeded: Vec<String>,
    exhausted: Vec<String>,
    fallback: Vec<String>,
}

impl Gathered {
    fn summary(&self, count: u64) -> String {
        let mut message = format!(
            "collected {} record(s) from {}",
            count,
            self.succeeded.join(", ")
        );
        if !self.fallback.is_empty() {
            message.push_str(&format!("; fallback document used for {}", self.fallback.join(", ")));
        }
        if !self.exhausted.is_empty() {
            message.push_str(&format!("; exhausted feeds: {}", self.exhausted.join(", ")));
        }
        message
    }
}

/// One async mutex per partition key, present only while a run holds or
/// waits for it.
#[derive(Debug, Default)]
struct PartitionLocks {
    inner: Mutex<HashMap<PartitionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl PartitionLocks {
    async fn acquire(&self, key: &PartitionKey) -> PartitionGuard<'_> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        PartitionGuard {
            locks: self,
            key: key.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Drop the entry for `key` once nobody else references it. Clones are
    /// only taken under the map lock, so the count cannot race upward here.
    fn release(&self, key: &PartitionKey) {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    fn holders(&self, key: &PartitionKey) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Arc::strong_count)
    }
}

struct PartitionGuard<'a> {
    locks: &'a PartitionLocks,
    key: PartitionKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PartitionGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.key);
    }
}

pub struct CollectionPipeline {
    registry: Arc<SourceRegistry>,
    store: PartitionStore,
    ledger: RunLedger,
    controller: RetryController,
    concurrency: usize,
    locks: PartitionLocks,
}

impl CollectionPipeline {
    pub fn new(pool: SqlitePool, registry: SourceRegistry, settings: PipelineSettings) -> Self {
        Self {
            registry: Arc::new(registry),
            store: PartitionStore::new(pool.clone(), settings.commit_mode),
            ledger: RunLedger::new(pool),
            controller: RetryController::new(settings.max_attempts)
                .with_pause(settings.retry_pause),
            concurrency: settings.concurrency.max(1),
            locks: PartitionLocks::default(),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Collect today's partition for `source_name`.
    pub async fn run_collection(&self, source_name: &str) -> CollectionOutcome {
        self.run_with_context(source_name, &RunContext::now()).await
    }

    pub async fn run_for_date(&self, source_name: &str, partition_date: NaiveDate) -> CollectionOutcome {
        self.run_with_context(source_name, &RunContext::for_date(partition_date))
            .await
    }

    pub async fn run_with_context(&self, source_name: &str, ctx: &RunContext) -> CollectionOutcome {
        let Some(source) = self.registry.get(source_name) else {
            warn!(source = source_name, "Run requested for unknown source");
            return CollectionOutcome::error(format!("unknown source '{}'", source_name));
        };

        let key = match PartitionKey::for_date(source.name.as_str(), ctx.partition_date) {
            Ok(key) => key,
            Err(e) => return CollectionOutcome::error(e.to_string()),
        };

        // Ledger rows require a 14-digit stamp
        if let Err(e) = parse_ingested_at(&ctx.ingested_at) {
            warn!(source = source_name, stamp = %ctx.ingested_at, "Rejected run context");
            return CollectionOutcome::error(e.to_string());
        }

        let _guard = self.locks.acquire(&key).await;
        let mut run = CollectionRun::new(key);
        let span = info_span!(
            "collection_run",
            run_id = %run.id,
            source = %run.key.source_name(),
            partition_date = %run.key.partition_date()
        );

        self.execute(&source, &mut run, ctx).instrument(span).await
    }

    /// Run every registered source for one context. Results follow registry order.
    pub async fn run_all(&self, ctx: &RunContext) -> Vec<(String, CollectionOutcome)> {
        stream::iter(self.registry.names())
            .map(|name| async move {
                let outcome = self.run_with_context(&name, ctx).await;
                (name, outcome)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await
    }

    async fn execute(
        &self,
        source: &SourceDefinition,
        run: &mut CollectionRun,
        ctx: &RunContext,
    ) -> CollectionOutcome {
        let started = Instant::now();
        info!(feeds = source.feeds.len(), "Collection run started");

        let mut outcome = match self.collect(source, run, ctx).await {
            Ok((count, message)) => CollectionOutcome::success(count, message),
            Err(failure) => {
                error!(state = %run.state(), "Collection run failed: {}", failure);
                CollectionOutcome::error(failure.to_string())
            },
        };

        if let Err(e) = self
            .ledger
            .record_at(
                &run.key,
                outcome.status,
                outcome.count,
                &outcome.message,
                &ctx.ingested_at,
            )
            .await
        {
            error!("Failed to write run ledger: {}", e);
            outcome.message = format!("{}; ledger write failed: {}", outcome.message, e);
        }

        info!(
            status = %outcome.status,
            count = outcome.count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection run finished"
        );

        outcome
    }

    async fn collect(
        &self,
        source: &SourceDefinition,
        run: &mut CollectionRun,
        ctx: &RunContext,
    ) -> Result<(u64, String), RunFailure> {
        run.transition(RunState::Acquiring)?;
        let mut gathered = match self.acquire_feeds(source, ctx).await {
            Ok(gathered) => gathered,
            Err(exhausted) => {
                run.transition(RunState::Exhausted)?;
                run.transition(RunState::Failed)?;
                return Err(exhausted.into());
            },
        };
        run.transition(RunState::Acquired)?;

        run.transition(RunState::Normalizing)?;
        let mut batch = std::mem::take(&mut gathered.batch);
        batch.stamp(PARTITION_DATE_FIELD, run.key.partition_date());
        batch.stamp(INGESTED_AT_FIELD, &ctx.ingested_at);
        let records = normalize(&batch, &source.schema);

        run.transition(RunState::Loading)?;
        let key = run.key.clone();
        match self.store.replace_partition(&key, &records).await {
            Ok(count) => {
                run.transition(RunState::Done)?;
                Ok((count, gathered.summary(count)))
            },
            Err(e) => {
                run.transition(RunState::PersistenceFailed)?;
                run.transition(RunState::Failed)?;
                Err(e.into())
            },
        }
    }

    /// Run every feed through the controller. Fails only when all feeds fail.
    async fn acquire_feeds(
        &self,
        source: &SourceDefinition,
        ctx: &RunContext,
    ) -> Result<Gathered, SourceExhausted> {
        let multi_feed = source.feeds.len() > 1;
        let mut gathered = Gathered::default();
        let mut failed_attempts: Vec<AttemptRecord> = Vec::new();

        for feed in &source.feeds {
            let candidates = feed.strategy.candidates(ctx.partition_date);
            let result = self
                .controller
                .run(&source.name, &candidates, feed.adapter.as_ref(), feed.max_attempts)
                .instrument(info_span!("feed", feed = %feed.label))
                .await;

            match result {
                Ok(acquired) => {
                    let mut batch = acquired.batch;
                    batch.fill_constants(&feed.constants);
                    if batch.is_fallback {
                        gathered.fallback.push(feed.label.clone());
                    }
                    gathered.succeeded.push(if multi_feed {
                        format!("{} ({})", feed.label, acquired.candidate.label())
                    } else {
                        acquired.candidate.label()
                    });
                    gathered.batch.is_fallback |= batch.is_fallback;
                    gathered.batch.records.extend(batch.records);
                },
                Err(exhausted) => {
                    warn!(feed = %feed.label, "{}", exhausted);
                    gathered.exhausted.push(feed.label.clone());
                    failed_attempts.extend(exhausted.attempts.into_iter().map(|mut attempt| {
                        if multi_feed {
                            attempt.candidate = format!("{}:{}", feed.label, attempt.candidate);
                        }
                        attempt
                    }));
                },
            }
        }

        if gathered.succeeded.is_empty() {
            return Err(SourceExhausted::new(source.name.clone(), failed_attempts));
        }
        Ok(gathered)
    }
}
