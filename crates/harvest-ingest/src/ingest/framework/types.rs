//! Core types shared by adapters, the controller and the pipeline

use chrono::{Days, NaiveDate};
use harvest_common::types::format_partition_date;
use serde::{Deserialize, Serialize};

/// Column carrying `strd_dt` on every record.
pub const PARTITION_DATE_FIELD: &str = "partition_date";

/// Column carrying `ins_dt` on every record.
pub const INGESTED_AT_FIELD: &str = "ingested_at";

/// One upstream record before normalization, keyed by upstream field name.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Records produced by one successful acquisition attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    pub records: Vec<RawRecord>,
    /// Built from a canned document instead of the live upstream.
    pub is_fallback: bool,
}

impl RawBatch {
    pub fn live(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            is_fallback: false,
        }
    }

    pub fn fallback(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            is_fallback: true,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overwrite `field` on every record.
    pub fn stamp(&mut self, field: &str, value: &str) {
        for record in &mut self.records {
            record.insert(field.to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    /// Set each constant on records that do not already carry it.
    pub fn fill_constants(&mut self, constants: &RawRecord) {
        for record in &mut self.records {
            for (field, value) in constants {
                record
                    .entry(field.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }
}

/// A typed, normalized field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(n) => Some(*n),
            FieldValue::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Float(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::IntList(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            },
        }
    }
}

/// A record whose fields follow the dataset schema's column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    fields: Vec<(String, FieldValue)>,
}

impl CanonicalRecord {
    pub fn new(fields: Vec<(String, FieldValue)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parameters for one acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireParams {
    /// The partition being collected.
    pub partition_date: NaiveDate,
    /// The date asked of the upstream; differs from the partition date on walkbacks.
    pub base_date: NaiveDate,
    /// Intra-day slot such as "0600", for sources published several times a day.
    pub slot: Option<String>,
}

impl AcquireParams {
    pub fn for_date(partition_date: NaiveDate) -> Self {
        Self {
            partition_date,
            base_date: partition_date,
            slot: None,
        }
    }

    /// Short label used in logs and attempt summaries.
    pub fn label(&self) -> String {
        match &self.slot {
            Some(slot) => format!("{}/{}", format_partition_date(self.base_date), slot),
            None => format_partition_date(self.base_date),
        }
    }

    /// Substitute `{partition_date}`, `{base_date}` and `{slot}` into a template.
    /// `{base_date-N}` is the base date N calendar days earlier.
    pub fn render(&self, template: &str) -> String {
        render_day_offsets(template, self.base_date)
            .replace("{partition_date}", &format_partition_date(self.partition_date))
            .replace("{base_date}", &format_partition_date(self.base_date))
            .replace("{base_date_iso}", &self.base_date.format("%Y-%m-%d").to_string())
            .replace("{slot}", self.slot.as_deref().unwrap_or(""))
    }
}

fn render_day_offsets(template: &str, base: NaiveDate) -> String {
    const OPEN: &str = "{base_date-";

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(at) = rest.find(OPEN) {
        out.push_str(&rest[..at]);
        let after = &rest[at + OPEN.len()..];
        let offset = after
            .find('}')
            .and_then(|end| after[..end].parse::<u64>().ok().map(|days| (days, end)));
        match offset {
            Some((days, end)) => {
                let date = base.checked_sub_days(Days::new(days)).unwrap_or(base);
                out.push_str(&format_partition_date(date));
                rest = &after[end + 1..];
            },
            None => {
                out.push_str(OPEN);
                rest = after;
            },
        }
    }
    out.push_str(rest);
    out
}

/// What happened on one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded { records: usize, fallback: bool },
    Failed(String),
}

/// One row of the controller's attempt history.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub candidate: String,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn failed(candidate: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            outcome: AttemptOutcome::Failed(reason.into()),
        }
    }

    pub fn succeeded(candidate: impl Into<String>, records: usize, fallback: bool) -> Self {
        Self {
            candidate: candidate.into(),
            outcome: AttemptOutcome::Succeeded { records, fallback },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded { .. })
    }
}

impl std::fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            AttemptOutcome::Succeeded { records, fallback } => {
                write!(f, "{} -> {} record(s)", self.candidate, records)?;
                if *fallback {
                    write!(f, " (fallback)")?;
                }
                Ok(())
            },
            AttemptOutcome::Failed(reason) => write!(f, "{} -> {}", self.candidate, reason),
        }
    }
}

/// Final status written to the run ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "success" => RunStatus::Success,
            _ => RunStatus::Error,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned to whoever triggered a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOutcome {
    pub status: RunStatus,
    pub count: u64,
    pub message: String,
}

impl CollectionOutcome {
    pub fn success(count: u64, message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            count,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            count: 0,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
