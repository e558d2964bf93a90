//! MCP tool implementations.
//!
//! - `query`: `query` and `explain`, the only tools that accept SQL text
//! - `schema`: `get_schema`, `refresh_schema`, `get_table_stats`,
//!   `get_column_stats` and `get_sample_data`, driven by the schema catalog

pub mod query;
pub mod schema;

pub use query::{ExplainInput, QueryInput, QueryOutput, QueryToolHandler};
pub use schema::{
    ColumnStatsInput, ConnectionInput, GetSchemaOutput, RefreshSchemaOutput, SampleDataInput,
    SchemaToolHandler, TableStatsInput, TableStatsOutput,
};
