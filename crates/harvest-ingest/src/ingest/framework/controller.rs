//! Candidate generation and bounded retry
//!
//! A feed's strategy expands the requested partition date into an ordered
//! candidate list (walking back over weekends, trying successive publication
//! slots, ...). The controller tries candidates in order and stops at the
//! first non-empty batch, never making more than `max_attempts` calls.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::adapter::SourceAdapter;
use super::types::{AcquireParams, AttemptRecord, RawBatch};
use crate::ingest::error::SourceExhausted;

/// Attempts per feed when neither the feed nor config says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Step back `offset_days`, then keep stepping back while on a weekend.
///
/// Holidays are not considered.
///
/// ```rust
/// use chrono::NaiveDate;
/// use harvest_ingest::ingest::framework::controller::business_day;
///
/// let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
/// let friday = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
/// assert_eq!(business_day(monday, 0), monday);
/// assert_eq!(business_day(monday, 1), friday);
/// ```
pub fn business_day(target: NaiveDate, offset_days: u32) -> NaiveDate {
    let mut current = target - Days::new(u64::from(offset_days));
    while matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
        current = current - Days::new(1);
    }
    current
}

/// How a feed expands a partition date into attempt parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateStrategy {
    /// Exactly one attempt for the partition date itself.
    Single,
    /// `business_day(D, offset)` followed by the preceding business days,
    /// `steps` distinct dates in total.
    BusinessDayWalkback { offset: u32, steps: u32 },
    /// `D - offset` followed by the preceding calendar days, `steps` dates
    /// in total. For upstreams that publish every day with a lag.
    DayWalkback { offset: u32, steps: u32 },
    /// Each slot on D, then each slot on D-1, ... back `days_back` days.
    TimeSlots { slots: Vec<String>, days_back: u32 },
}

impl CandidateStrategy {
    pub fn candidates(&self, partition_date: NaiveDate) -> Vec<AcquireParams> {
        match self {
            CandidateStrategy::Single => vec![AcquireParams::for_date(partition_date)],
            CandidateStrategy::BusinessDayWalkback { offset, steps } => {
                let mut out = Vec::with_capacity(*steps as usize);
                let mut base = business_day(partition_date, *offset);
                for _ in 0..*steps {
                    out.push(AcquireParams {
                        partition_date,
                        base_date: base,
                        slot: None,
                    });
                    base = business_day(base, 1);
                }
                out
            },
            CandidateStrategy::DayWalkback { offset, steps } => (0..*steps)
                .filter_map(|back| {
                    let days = u64::from(*offset) + u64::from(back);
                    partition_date
                        .checked_sub_days(Days::new(days))
                        .map(|base_date| AcquireParams {
                            partition_date,
                            base_date,
                            slot: None,
                        })
                })
                .collect(),
            CandidateStrategy::TimeSlots { slots, days_back } => {
                let mut out = Vec::with_capacity(slots.len() * (*days_back as usize + 1));
                for back in 0..=*days_back {
                    let base_date = partition_date - Days::new(u64::from(back));
                    for slot in slots {
                        out.push(AcquireParams {
                            partition_date,
                            base_date,
                            slot: Some(slot.clone()),
                        });
                    }
                }
                out
            },
        }
    }
}

/// The first successful attempt and everything tried before it.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub batch: RawBatch,
    pub candidate: AcquireParams,
    pub attempts: Vec<AttemptRecord>,
}

/// Bounded, ordered retry over a candidate list.
#[derive(Debug, Clone)]
pub struct RetryController {
    max_attempts: usize,
    pause: Duration,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryController {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            pause: Duration::ZERO,
        }
    }

    /// Sleep between failed attempts.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Try candidates in order. Makes exactly `min(candidates.len(), limit)`
    /// calls when every one fails, where `limit` is `max_attempts` unless the
    /// caller overrides it.
    pub async fn run(
        &self,
        source_name: &str,
        candidates: &[AcquireParams],
        adapter: &dyn SourceAdapter,
        limit: Option<usize>,
    ) -> Result<Acquired, SourceExhausted> {
        let limit = limit.unwrap_or(self.max_attempts).min(candidates.len());
        let mut attempts = Vec::with_capacity(limit);

        for (i, candidate) in candidates.iter().take(limit).enumerate() {
            let label = candidate.label();
            debug!(
                source = source_name,
                candidate = %label,
                attempt = i + 1,
                limit,
                "Acquiring"
            );

            match adapter.acquire(candidate).await {
                Ok(batch) if !batch.is_empty() => {
                    attempts.push(AttemptRecord::succeeded(&label, batch.len(), batch.is_fallback));
                    if batch.is_fallback {
                        warn!(
                            source = source_name,
                            candidate = %label,
                            records = batch.len(),
                            "Upstream unavailable, using fallback document"
                        );
                    } else {
                        info!(
                            source = source_name,
                            candidate = %label,
                            records = batch.len(),
                            "Acquired batch"
                        );
                    }
                    return Ok(Acquired {
                        batch,
                        candidate: candidate.clone(),
                        attempts,
                    });
                },
                Ok(_) => {
                    warn!(
                        source = source_name,
                        candidate = %label,
                        "Attempt {}/{} returned no records",
                        i + 1,
                        limit
                    );
                    attempts.push(AttemptRecord::failed(&label, "no records"));
                },
                Err(e) => {
                    warn!(
                        source = source_name,
                        candidate = %label,
                        "Attempt {}/{} failed: {}",
                        i + 1,
                        limit,
                        e
                    );
                    attempts.push(AttemptRecord::failed(&label, e.to_string()));
                },
            }

            if i + 1 < limit && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        Err(SourceExhausted::new(source_name, attempts))
    }
}
