//! Dataset schemas
//!
//! A schema is the ordered column list for one source. The normalizer emits
//! exactly these columns, in this order, for every record.

use serde::Serialize;

use super::types::{FieldValue, INGESTED_AT_FIELD, PARTITION_DATE_FIELD};
use crate::ingest::error::SchemaError;

/// Target type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    /// Bracketed integer list, zero-padded to `width` entries.
    IntList { width: usize },
}

impl ColumnKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::IntList { .. } => "integer list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    /// Used when the upstream omits the field or it cannot be coerced.
    pub default: Option<FieldValue>,
    /// Upstream field names that map onto this column.
    pub aliases: Vec<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            aliases: Vec::new(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Float)
    }

    pub fn int_list(name: impl Into<String>, width: usize) -> Self {
        Self::new(name, ColumnKind::IntList { width })
    }

    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn alias(mut self, upstream: impl Into<String>) -> Self {
        self.aliases.push(upstream.into());
        self
    }

    /// Default if declared, otherwise `Null`.
    pub fn fallback_value(&self) -> FieldValue {
        self.default.clone().unwrap_or(FieldValue::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSchema {
    name: String,
    columns: Vec<ColumnSpec>,
}

impl DatasetSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self, SchemaError> {
        let name = name.into();
        if columns.is_empty() {
            return Err(SchemaError::Empty(name));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::DuplicateColumn {
                    dataset: name,
                    column: column.name.clone(),
                });
            }
        }
        Ok(Self { name, columns })
    }

    /// Wrap `columns` with the `partition_date` / `ingested_at` bookends every
    /// collected dataset carries.
    pub fn stamped(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self, SchemaError> {
        let mut all = Vec::with_capacity(columns.len() + 2);
        all.push(ColumnSpec::text(PARTITION_DATE_FIELD));
        all.extend(columns);
        all.push(ColumnSpec::text(INGESTED_AT_FIELD));
        Self::new(name, all)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
