//! Core tabular model and report record types for the BN/ATI match report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "bnati-core";

/// Column headers of the three open-data CSV dumps.
pub mod columns {
    pub const OWNER_ORG: &str = "owner_org";

    /// Table A (briefing notes).
    pub const TRACKING_NUMBER: &str = "tracking_number";

    /// Table B (completed informal requests).
    pub const B_REQUEST_NUMBER: &str = "Request Number";
    pub const B_INFORMAL_REQUESTS: &str = "Number of Informal Requests";
    pub const B_UNIQUE_IDENTIFIER: &str = "Unique Identifier";

    /// Table C (ATI request summaries).
    pub const C_REQUEST_NUMBER: &str = "request_number";
    pub const SUMMARY_EN: &str = "summary_en";
    pub const SUMMARY_FR: &str = "summary_fr";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{table} is missing expected columns: {missing:?}")]
    MissingColumns { table: String, missing: Vec<String> },
}

/// A single CSV record. Every value is a string; absent fields read as `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: BTreeMap<String, String>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Ordered rows sharing a column schema, labelled for error reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table whose schema is the union of the rows' field names, in first-seen order.
    pub fn from_rows(name: impl Into<String>, rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for field in row.field_names() {
                if !columns.iter().any(|c| c == field) {
                    columns.push(field.to_string());
                }
            }
        }
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    pub fn require_columns(&self, required: &[&str]) -> Result<(), SchemaError> {
        let missing = self.missing_columns(required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::MissingColumns {
                table: self.name.clone(),
                missing,
            })
        }
    }

    /// Add any absent columns to the schema and return their names.
    ///
    /// Rows need no rewriting: a field missing from a row already reads as `""`.
    pub fn ensure_columns(&mut self, expected: &[&str]) -> Vec<String> {
        let missing = self.missing_columns(expected);
        self.columns.extend(missing.iter().cloned());
        missing
    }
}

/// One group of table B: a request within an owner, with its measures.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub owner_org: String,
    pub request_number: String,
    /// Lowercased `request_number`, used as the case-insensitive join key.
    pub request_number_key: String,
    pub informal_requests_sum: f64,
    /// Distinct, trimmed, non-empty identifiers in ascending order.
    pub identifiers: Vec<String>,
}

impl AggregateRecord {
    pub fn unique_identifiers(&self) -> String {
        self.identifiers.join("; ")
    }
}

/// A row of table C enriched with its aggregate (or zero/empty defaults).
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord {
    pub owner_org: String,
    pub request_number: String,
    pub informal_requests_sum: f64,
    pub unique_identifiers: String,
    pub summary_en: String,
    pub summary_fr: String,
    /// `lowercase(summary_en + " " + summary_fr)`; only ever a match target.
    pub haystack: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub owner_org: String,
    pub tracking_number: String,
    #[serde(rename = "c_request_number")]
    pub request_number: String,
    pub informal_requests_sum: f64,
    pub unique_identifiers: String,
    pub summary_en: String,
    pub summary_fr: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    #[serde(rename = "A_rows")]
    pub a_rows: usize,
    #[serde(rename = "B_rows")]
    pub b_rows: usize,
    #[serde(rename = "C_rows")]
    pub c_rows: usize,
    #[serde(rename = "BC_rows")]
    pub bc_rows: usize,
    pub matches: usize,
    pub weak_matches: usize,
    pub strong_matches: usize,
}

/// Replace NaN and infinities with zero; report artifacts only carry finite numbers.
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
