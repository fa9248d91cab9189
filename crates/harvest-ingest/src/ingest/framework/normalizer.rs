//! Raw-to-canonical record mapping
//!
//! Normalization never fails a run. Each column is looked up by name, then by
//! alias; missing fields take the column default (or null); values that cannot
//! be coerced are logged and replaced. Raw fields the schema does not name are
//! dropped.

use serde_json::Value;
use tracing::warn;

use super::schema::{ColumnKind, ColumnSpec, DatasetSchema};
use super::types::{CanonicalRecord, FieldValue, RawBatch, RawRecord};
use crate::ingest::error::NormalizationError;

/// Normalize every record of a batch against `schema`.
pub fn normalize(batch: &RawBatch, schema: &DatasetSchema) -> Vec<CanonicalRecord> {
    batch
        .records
        .iter()
        .map(|raw| normalize_record(raw, schema))
        .collect()
}

pub fn normalize_record(raw: &RawRecord, schema: &DatasetSchema) -> CanonicalRecord {
    let fields = schema
        .columns()
        .iter()
        .map(|column| {
            let value = match lookup(raw, column) {
                None | Some(Value::Null) => column.fallback_value(),
                Some(value) => coerce_logged(schema.name(), column, value),
            };
            (column.name.clone(), value)
        })
        .collect();
    CanonicalRecord::new(fields)
}

fn lookup<'a>(raw: &'a RawRecord, column: &ColumnSpec) -> Option<&'a Value> {
    raw.get(&column.name)
        .or_else(|| column.aliases.iter().find_map(|alias| raw.get(alias)))
}

fn coerce_logged(dataset: &str, column: &ColumnSpec, value: &Value) -> FieldValue {
    let (coerced, problems) = coerce(column, value);
    for problem in &problems {
        warn!(dataset, column = %column.name, "Coerced value: {}", problem);
    }
    coerced
}

/// Coerce one raw value. Always yields a value; the second element lists what
/// had to be patched along the way.
pub fn coerce(column: &ColumnSpec, value: &Value) -> (FieldValue, Vec<NormalizationError>) {
    let mut problems = Vec::new();
    let shape_error = |found: &Value| NormalizationError::UnexpectedShape {
        column: column.name.clone(),
        expected: column.kind.describe(),
        found: value_kind(found).to_string(),
    };

    let coerced = match (column.kind, value) {
        (_, Value::Null) => column.fallback_value(),

        (ColumnKind::Text, Value::String(s)) => FieldValue::Text(collapse_whitespace(s)),
        (ColumnKind::Text, Value::Number(n)) => FieldValue::Text(n.to_string()),
        (ColumnKind::Text, Value::Bool(b)) => FieldValue::Text(b.to_string()),

        (ColumnKind::Integer, Value::Number(n)) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => FieldValue::Integer(n.as_f64().map(|f| f.trunc() as i64).unwrap_or(0)),
        },
        (ColumnKind::Integer, Value::String(s)) => match parse_grouped_int(s) {
            Some(i) => FieldValue::Integer(i),
            None => {
                problems.push(bad_token(column, s));
                FieldValue::Integer(0)
            },
        },

        (ColumnKind::Float, Value::Number(n)) => FieldValue::Float(n.as_f64().unwrap_or(0.0)),
        (ColumnKind::Float, Value::String(s)) => match parse_grouped_float(s) {
            Some(f) => FieldValue::Float(f),
            None => {
                problems.push(bad_token(column, s));
                FieldValue::Float(0.0)
            },
        },

        (ColumnKind::IntList { width }, Value::String(s)) => {
            let (values, bad) = bracket_values(s, width);
            problems.extend(bad.into_iter().map(|token| bad_token(column, &token)));
            FieldValue::IntList(values)
        },
        (ColumnKind::IntList { width }, Value::Array(items)) => {
            let mut values = Vec::with_capacity(items.len().max(width));
            for item in items {
                let parsed = match item {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => parse_grouped_int(s),
                    _ => None,
                };
                values.push(parsed.unwrap_or_else(|| {
                    problems.push(bad_token(column, &item.to_string()));
                    0
                }));
            }
            pad(&mut values, width);
            FieldValue::IntList(values)
        },
        (ColumnKind::IntList { width }, Value::Number(n)) => {
            let mut values = vec![n.as_i64().unwrap_or(0)];
            pad(&mut values, width);
            FieldValue::IntList(values)
        },

        (_, other) => {
            problems.push(shape_error(other));
            column.fallback_value()
        },
    };

    (coerced, problems)
}

fn bad_token(column: &ColumnSpec, token: &str) -> NormalizationError {
    NormalizationError::BadToken {
        column: column.name.clone(),
        token: token.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn pad(values: &mut Vec<i64>, width: usize) {
    if values.len() < width {
        values.resize(width, 0);
    }
}

/// Parse an integer that may carry `,` grouping separators.
///
/// Whole-valued decimals ("12.0") are accepted; anything else is `None`.
pub fn parse_grouped_int(text: &str) -> Option<i64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<i64>().ok().or_else(|| {
        cleaned
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Parse a float that may carry `,` grouping separators.
pub fn parse_grouped_float(text: &str) -> Option<f64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse a bracketed list such as `"(10 5 3 1)"` into integers.
///
/// Brackets are stripped, whitespace splits tokens, non-numeric tokens become
/// 0, and the result is zero-padded to `width`.
///
/// ```rust
/// use harvest_ingest::ingest::framework::normalizer::parse_bracket_values;
///
/// assert_eq!(parse_bracket_values("(1,200 30 4 0)", 4), vec![1200, 30, 4, 0]);
/// assert_eq!(parse_bracket_values("(-- x)", 4), vec![0, 0, 0, 0]);
/// ```
pub fn parse_bracket_values(text: &str, width: usize) -> Vec<i64> {
    let (values, bad) = bracket_values(text, width);
    for token in bad {
        warn!(token = %token, "Non-numeric token in bracket list, using 0");
    }
    values
}

fn bracket_values(text: &str, width: usize) -> (Vec<i64>, Vec<String>) {
    let stripped: String = text
        .chars()
        .map(|c| if matches!(c, '(' | ')' | '[' | ']') { ' ' } else { c })
        .collect();

    let mut values = Vec::with_capacity(width);
    let mut bad = Vec::new();
    for token in stripped.split_whitespace() {
        match parse_grouped_int(token) {
            Some(v) => values.push(v),
            None => {
                bad.push(token.to_string());
                values.push(0);
            },
        }
    }
    pad(&mut values, width);
    (values, bad)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn market_schema() -> DatasetSchema {
        DatasetSchema::stamped(
            "market_index",
            vec![
                ColumnSpec::text("market"),
                ColumnSpec::float("close").alias("Close"),
                ColumnSpec::integer("volume").alias("Volume"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_alias_lookup_and_extra_fields_dropped() {
        let record = normalize_record(
            &raw(json!({
                "partition_date": "20240105",
                "market": "KOSPI",
                "Close": 2578.08,
                "Volume": "1,234,567",
                "Adj Close": 1.0,
                "ingested_at": "20240105183000"
            })),
            &market_schema(),
        );

        assert_eq!(
            record.columns().collect::<Vec<_>>(),
            vec!["partition_date", "market", "close", "volume", "ingested_at"]
        );
        assert_eq!(record.get("close"), Some(&FieldValue::Float(2578.08)));
        assert_eq!(record.get("volume"), Some(&FieldValue::Integer(1_234_567)));
        assert!(record.get("Adj Close").is_none());
    }

    #[test]
    fn test_missing_fields_take_default_or_null() {
        let schema = DatasetSchema::stamped(
            "weather_nowcast",
            vec![
                ColumnSpec::text("base_time").alias("baseTime").with_default(FieldValue::text("0600")),
                ColumnSpec::integer("nx"),
            ],
        )
        .unwrap();
        let record = normalize_record(&raw(json!({"nx": null})), &schema);
        assert_eq!(record.get("base_time"), Some(&FieldValue::text("0600")));
        assert_eq!(record.get("nx"), Some(&FieldValue::Null));
        assert_eq!(record.get("partition_date"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_unparseable_integer_becomes_zero() {
        let column = ColumnSpec::integer("volume");
        let (value, problems) = coerce(&column, &json!("--"));
        assert_eq!(value, FieldValue::Integer(0));
        assert_eq!(
            problems,
            vec![NormalizationError::BadToken {
                column: "volume".into(),
                token: "--".into()
            }]
        );

        let (value, problems) = coerce(&column, &json!("2,500"));
        assert_eq!(value, FieldValue::Integer(2500));
        assert!(problems.is_empty());
    }

    #[test]
    fn test_shape_mismatch_degrades_to_default() {
        let column = ColumnSpec::text("category").with_default(FieldValue::text("T1H"));
        let (value, problems) = coerce(&column, &json!({"nested": true}));
        assert_eq!(value, FieldValue::text("T1H"));
        assert!(matches!(
            problems[0],
            NormalizationError::UnexpectedShape { expected: "text", .. }
        ));
    }

    #[test]
    fn test_text_whitespace_collapsed() {
        let (value, _) = coerce(&ColumnSpec::text("name"), &json!("  Kakao \n Corp "));
        assert_eq!(value, FieldValue::text("Kakao Corp"));
    }

    #[test]
    fn test_bracket_values() {
        assert_eq!(parse_bracket_values("(1,200) (30) (4) (0)", 4), vec![1200, 30, 4, 0]);
        assert_eq!(parse_bracket_values("(10 5)", 4), vec![10, 5, 0, 0]);
        assert_eq!(parse_bracket_values("", 4), vec![0, 0, 0, 0]);
        assert_eq!(parse_bracket_values("(1 2 3 4 5)", 4), vec![1, 2, 3, 4, 5]);

        let (values, bad) = bracket_values("(-- x)", 4);
        assert_eq!(values, vec![0, 0, 0, 0]);
        assert_eq!(bad, vec!["--".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_int_list_from_array() {
        let column = ColumnSpec::int_list("remaining", 4);
        let (value, problems) = coerce(&column, &json!([3, "1,000", "n/a"]));
        assert_eq!(value, FieldValue::IntList(vec![3, 1000, 0, 0]));
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn test_parse_grouped_numbers() {
        assert_eq!(parse_grouped_int("-1,234"), Some(-1234));
        assert_eq!(parse_grouped_int("12.0"), Some(12));
        assert_eq!(parse_grouped_int("12.5"), None);
        assert_eq!(parse_grouped_int(""), None);
        assert_eq!(parse_grouped_float("2,578.08"), Some(2578.08));
        assert_eq!(parse_grouped_float("NaN"), None);
    }
}
