//! Query-related data models.
//!
//! This module defines types for SQL query parameters, options and results.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Default row limit for query results.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Maximum allowed row limit.
pub const MAX_ROW_LIMIT: u32 = 10000;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Maximum query timeout in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 300;

/// Default and maximum row counts for sample data.
pub const DEFAULT_SAMPLE_LIMIT: u32 = 5;
pub const MAX_SAMPLE_LIMIT: u32 = 100;

/// A scalar parameter value for parameterized queries.
///
/// Only values are ever bound; identifiers go through the catalog whitelist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Execution bounds for a single read-only statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub timeout: Duration,
    /// At most this many rows are materialized; one extra is fetched to detect truncation.
    pub row_limit: u32,
}

impl QueryOptions {
    pub fn new(timeout: Duration, row_limit: u32) -> Self {
        Self {
            timeout,
            row_limit: row_limit.clamp(1, MAX_ROW_LIMIT),
        }
    }

    /// Apply caller overrides, clamped to the server maximums.
    pub fn with_overrides(self, limit: Option<u32>, timeout_secs: Option<u64>) -> Self {
        Self {
            timeout: timeout_secs
                .map(|t| Duration::from_secs(t.clamp(1, MAX_QUERY_TIMEOUT_SECS)))
                .unwrap_or(self.timeout),
            row_limit: limit
                .map(|l| l.clamp(1, MAX_ROW_LIMIT))
                .unwrap_or(self.row_limit),
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            DEFAULT_ROW_LIMIT,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "int8", "varchar", "TEXT")
    pub type_name: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Rows produced by a validated read-only statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// True if more rows existed than the row limit allowed.
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn empty(execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            truncated: false,
            execution_time_ms,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// First value of the first row, for single-cell aggregates.
    pub fn scalar(&self) -> Option<&JsonValue> {
        let column = self.columns.first()?;
        self.rows.first()?.get(&column.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_deserializes_untagged() {
        let params: Vec<QueryParam> =
            serde_json::from_str(r#"[null, true, 42, 1.5, "abc"]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Int(42),
                QueryParam::Float(1.5),
                QueryParam::String("abc".into()),
            ]
        );
        assert_eq!(params[2].type_name(), "int");
        assert!(params[0].is_null());
    }

    #[test]
    fn test_query_options_clamp() {
        let options = QueryOptions::default().with_overrides(Some(0), Some(10_000));
        assert_eq!(options.row_limit, 1);
        assert_eq!(
            options.timeout,
            Duration::from_secs(MAX_QUERY_TIMEOUT_SECS)
        );

        let options = QueryOptions::default().with_overrides(Some(1_000_000), None);
        assert_eq!(options.row_limit, MAX_ROW_LIMIT);
        assert_eq!(
            options.timeout,
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_scalar_reads_first_cell() {
        let mut row = serde_json::Map::new();
        row.insert("n".into(), JsonValue::from(3));
        let result = QueryResult {
            columns: vec![ColumnMetadata::new("n", "INTEGER")],
            rows: vec![row],
            truncated: false,
            execution_time_ms: 1,
        };
        assert_eq!(result.scalar(), Some(&JsonValue::from(3)));
        assert_eq!(QueryResult::empty(0).scalar(), None);
    }
}
