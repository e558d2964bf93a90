//! Free-SQL tools: `query` and `explain`.
//!
//! These are the only tools that accept SQL text. Both hand it to the
//! connection's [`SafeExecutor`](crate::db::SafeExecutor), which validates
//! before anything reaches the database.

use crate::db::ConnectionManager;
use crate::error::DbResult;
use crate::models::{ColumnMetadata, MAX_ROW_LIMIT, QueryParam, QueryResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

/// Input for the query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// Database connection ID from list_connections
    pub connection_id: String,
    /// A single SELECT statement. Anything that could write, or more than one statement, is rejected.
    pub sql: String,
    /// Positional parameters for parameterized queries (use ? or $1,$2... placeholders in SQL)
    #[serde(default)]
    pub params: Vec<QueryParamInput>,
    /// Maximum rows to return. Default: 100, max: 10000
    #[serde(default)]
    pub limit: Option<u32>,
    /// Query timeout in seconds. Default: 30, max: 300
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Input parameter that can be various JSON types.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QueryParamInput {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
}

impl From<QueryParamInput> for QueryParam {
    fn from(input: QueryParamInput) -> Self {
        match input {
            QueryParamInput::Null => QueryParam::Null,
            QueryParamInput::Bool(v) => QueryParam::Bool(v),
            QueryParamInput::Int(v) => QueryParam::Int(v),
            QueryParamInput::Float(v) => QueryParam::Float(v),
            QueryParamInput::String(v) => QueryParam::String(v),
        }
    }
}

/// Output from the query, explain and get_sample_data tools.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryOutput {
    /// Column names and database types, in result order
    pub columns: Vec<ColumnMetadataOutput>,
    /// Result rows as key-value maps
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// True if result was truncated due to limit
    pub truncated: bool,
    /// Number of rows returned
    pub row_count: usize,
    /// Query execution time in milliseconds
    pub execution_time_ms: u64,
    /// Warning message if any issues occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ColumnMetadataOutput {
    pub name: String,
    pub type_name: String,
}

impl From<ColumnMetadata> for ColumnMetadataOutput {
    fn from(meta: ColumnMetadata) -> Self {
        Self {
            name: meta.name,
            type_name: meta.type_name,
        }
    }
}

impl QueryOutput {
    pub fn from_result_with_warning(result: QueryResult, warning: Option<String>) -> Self {
        Self {
            row_count: result.rows.len(),
            columns: result.columns.into_iter().map(Into::into).collect(),
            rows: result.rows,
            truncated: result.truncated,
            execution_time_ms: result.execution_time_ms,
            warning,
        }
    }
}

impl From<QueryResult> for QueryOutput {
    fn from(result: QueryResult) -> Self {
        Self::from_result_with_warning(result, None)
    }
}

/// Input for the explain tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExplainInput {
    /// Database connection ID from list_connections
    pub connection_id: String,
    /// The SELECT statement to explain. It is planned, never executed.
    pub sql: String,
}

/// Handler for the free-SQL tools.
pub struct QueryToolHandler {
    connection_manager: Arc<ConnectionManager>,
}

impl QueryToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    pub async fn query(&self, input: QueryInput) -> DbResult<QueryOutput> {
        let executor = self.connection_manager.get(&input.connection_id).await?;

        let limit_warning = input
            .limit
            .filter(|requested| *requested > MAX_ROW_LIMIT)
            .map(|requested| {
                format!(
                    "Requested limit {} exceeds maximum allowed ({}). Results capped to {} rows.",
                    requested, MAX_ROW_LIMIT, MAX_ROW_LIMIT
                )
            });

        let params: Vec<QueryParam> = input.params.into_iter().map(Into::into).collect();
        let options = executor.options(input.limit, input.timeout_secs);
        let result = executor.query(&input.sql, &params, &options).await?;

        info!(
            connection_id = %input.connection_id,
            row_count = result.row_count(),
            truncated = result.truncated,
            execution_time_ms = result.execution_time_ms,
            "Query executed"
        );

        Ok(QueryOutput::from_result_with_warning(result, limit_warning))
    }

    pub async fn explain(&self, input: ExplainInput) -> DbResult<QueryOutput> {
        let executor = self.connection_manager.get(&input.connection_id).await?;
        let result = executor.explain(&input.sql).await?;
        info!(connection_id = %input.connection_id, "Query plan fetched");
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_input_deserialization() {
        let json = r#"{
            "connection_id": "conn_123",
            "sql": "SELECT * FROM users WHERE id = $1",
            "params": [42],
            "limit": 100
        }"#;

        let input: QueryInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.connection_id, "conn_123");
        assert_eq!(input.params.len(), 1);
        assert_eq!(input.limit, Some(100));
        assert_eq!(input.timeout_secs, None);
    }

    #[test]
    fn test_query_param_conversion() {
        assert!(matches!(
            QueryParam::from(QueryParamInput::Null),
            QueryParam::Null
        ));
        assert!(matches!(
            QueryParam::from(QueryParamInput::Bool(true)),
            QueryParam::Bool(true)
        ));
        assert!(matches!(
            QueryParam::from(QueryParamInput::Int(42)),
            QueryParam::Int(42)
        ));
        assert_eq!(
            QueryParam::from(QueryParamInput::String("x".into())),
            QueryParam::String("x".into())
        );
    }

    #[test]
    fn test_query_output_serialization() {
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), JsonValue::Number(1.into()));
        let result = QueryResult {
            columns: vec![ColumnMetadata::new("id", "INTEGER")],
            rows: vec![row],
            truncated: false,
            execution_time_ms: 10,
        };

        let json = serde_json::to_string(&QueryOutput::from(result)).unwrap();
        assert!(json.contains("\"row_count\":1"));
        assert!(json.contains("\"truncated\":false"));
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("warning"));
    }
}
