//! Data models for the DB Guard MCP Server.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, ConnectionInfo, DatabaseType};
pub use query::{
    ColumnMetadata, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_LIMIT, DEFAULT_SAMPLE_LIMIT,
    MAX_QUERY_TIMEOUT_SECS, MAX_ROW_LIMIT, MAX_SAMPLE_LIMIT, QueryOptions, QueryParam,
    QueryResult,
};
pub use schema::{
    ColumnInfo, ColumnStats, ForeignKey, IndexUsage, SchemaMap, TableKind, TableSchema,
    TableStats,
};
