//! Catalog-backed tools.
//!
//! None of these accept SQL. Table and column names are whitelisted against
//! the connection's schema catalog, and any SQL they need is built from the
//! catalog's own spelling of the identifier.

use crate::db::{CatalogSnapshot, ConnectionManager};
use crate::error::DbResult;
use crate::models::{ColumnStats, DatabaseType, IndexUsage, TableSchema, TableStats};
use crate::security::ValidationMode;
use crate::tools::query::QueryOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Format bytes as human-readable size string.
///
/// Uses binary units (1 KB = 1024 bytes) consistent with database tools.
///
/// # Examples
///
/// ```
/// use db_guard_mcp::tools::schema::format_size;
///
/// assert_eq!(format_size(512), "512 B");
/// assert_eq!(format_size(1024), "1 kB");
/// assert_eq!(format_size(1048576), "1 MB");
/// ```
pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::WINDOWS)
}

/// Input for tools that only need a connection.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ConnectionInput {
    /// Database connection ID from list_connections
    pub connection_id: String,
}

/// Output from get_schema.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GetSchemaOutput {
    /// Tables and views with columns and foreign keys
    pub tables: Vec<TableSchema>,
    pub count: usize,
    /// Increments on every catalog refresh
    pub generation: u64,
    /// RFC 3339 time of the last refresh
    pub refreshed_at: String,
}

impl From<&CatalogSnapshot> for GetSchemaOutput {
    fn from(snapshot: &CatalogSnapshot) -> Self {
        let tables: Vec<TableSchema> = snapshot.tables().values().cloned().collect();
        Self {
            count: tables.len(),
            tables,
            generation: snapshot.generation(),
            refreshed_at: snapshot.refreshed_at().to_rfc3339(),
        }
    }
}

/// Output from refresh_schema.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RefreshSchemaOutput {
    /// Number of tables and views in the new catalog
    pub count: usize,
    pub generation: u64,
    pub refreshed_at: String,
}

/// Input for get_table_stats.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableStatsInput {
    /// Database connection ID from list_connections
    pub connection_id: String,
    /// Table name exactly as reported by get_schema
    pub table_name: String,
}

/// Output from get_table_stats.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TableStatsOutput {
    pub table: String,
    /// Planner estimate (MySQL, PostgreSQL) or exact count (SQLite)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count_estimate: Option<i64>,
    /// Bytes (data + indexes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_formatted: Option<String>,
    pub index_usage: Vec<IndexUsage>,
}

impl From<TableStats> for TableStatsOutput {
    fn from(stats: TableStats) -> Self {
        Self {
            table: stats.table,
            row_count_estimate: stats.row_count_estimate,
            size_bytes: stats.size_bytes,
            size_formatted: stats.size_bytes.map(format_size),
            index_usage: stats.index_usage,
        }
    }
}

/// Output from get_database_stats.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DatabaseStatsOutput {
    /// One entry per base table, views excluded
    pub tables: Vec<TableStatsOutput>,
    pub count: usize,
    /// Sum over tables that report a size
    pub total_size_bytes: u64,
    pub total_size_formatted: String,
    pub total_indexes: usize,
}

impl From<Vec<TableStats>> for DatabaseStatsOutput {
    fn from(stats: Vec<TableStats>) -> Self {
        let total_size_bytes = stats.iter().filter_map(|s| s.size_bytes).sum();
        let total_indexes = stats.iter().map(|s| s.index_usage.len()).sum();
        let tables: Vec<TableStatsOutput> = stats.into_iter().map(Into::into).collect();
        Self {
            count: tables.len(),
            tables,
            total_size_bytes,
            total_size_formatted: format_size(total_size_bytes),
            total_indexes,
        }
    }
}

/// Output from get_db_status.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DbStatusOutput {
    pub connection_id: String,
    pub dialect: DatabaseType,
    /// Validation mode applied to free SQL
    pub mode: ValidationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// 0 until the first catalog refresh
    pub catalog_generation: u64,
    pub catalog_tables: usize,
    /// Seconds since the last refresh, absent before the first one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_age_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_refreshed_at: Option<String>,
    pub catalog_ttl_secs: u64,
}

/// Input for get_column_stats.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ColumnStatsInput {
    /// Database connection ID from list_connections
    pub connection_id: String,
    /// Table name exactly as reported by get_schema
    pub table_name: String,
    /// Column name as reported by get_schema
    pub column_name: String,
}

/// Input for get_sample_data.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SampleDataInput {
    /// Database connection ID from list_connections
    pub connection_id: String,
    /// Table name exactly as reported by get_schema
    pub table_name: String,
    /// Rows to return. Default: 5, max: 100
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Handler for catalog-backed tools.
pub struct SchemaToolHandler {
    connection_manager: Arc<ConnectionManager>,
}

impl SchemaToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    pub async fn get_schema(&self, input: ConnectionInput) -> DbResult<GetSchemaOutput> {
        let executor = self.connection_manager.get(&input.connection_id).await?;
        let snapshot = executor.schema().await?;
        info!(
            connection_id = %input.connection_id,
            count = snapshot.table_count(),
            "Schema returned"
        );
        Ok(snapshot.as_ref().into())
    }

    pub async fn refresh_schema(&self, input: ConnectionInput) -> DbResult<RefreshSchemaOutput> {
        let executor = self.connection_manager.get(&input.connection_id).await?;
        let snapshot = executor.refresh_schema().await?;
        Ok(RefreshSchemaOutput {
            count: snapshot.table_count(),
            generation: snapshot.generation(),
            refreshed_at: snapshot.refreshed_at().to_rfc3339(),
        })
    }

    pub async fn get_table_stats(&self, input: TableStatsInput) -> DbResult<TableStatsOutput> {
        let executor = self.connection_manager.get(&input.connection_id).await?;
        let stats = executor.table_stats(&input.table_name).await?;
        info!(
            connection_id = %input.connection_id,
            table = %stats.table,
            indexes = stats.index_usage.len(),
            "Table statistics fetched"
        );
        Ok(stats.into())
    }

    pub async fn get_database_stats(&self, input: ConnectionInput) -> DbResult<DatabaseStatsOutput> {
        let executor = self.connection_manager.get(&input.connection_id).await?;
        let output = DatabaseStatsOutput::from(executor.database_stats().await?);
        info!(
            connection_id = %input.connection_id,
            tables = output.count,
            total_size_bytes = output.total_size_bytes,
            "Database statistics fetched"
        );
        Ok(output)
    }

    /// Reports the cached catalog as is; never triggers a refresh.
    pub async fn get_db_status(&self, input: ConnectionInput) -> DbResult<DbStatusOutput> {
        let executor = self.connection_manager.get(&input.connection_id).await?;
        let snapshot = executor.catalog().current().await;
        Ok(DbStatusOutput {
            dialect: executor.dialect(),
            mode: executor.mode(),
            server_version: executor.server_version().await,
            catalog_generation: snapshot.as_ref().map_or(0, |s| s.generation()),
            catalog_tables: snapshot.as_ref().map_or(0, |s| s.table_count()),
            catalog_age_secs: snapshot.as_ref().map(|s| s.age().as_secs()),
            catalog_refreshed_at: snapshot.as_ref().map(|s| s.refreshed_at().to_rfc3339()),
            catalog_ttl_secs: executor.catalog().ttl().as_secs(),
            connection_id: input.connection_id,
        })
    }

    pub async fn get_column_stats(&self, input: ColumnStatsInput) -> DbResult<ColumnStats> {
        let executor = self.connection_manager.get(&input.connection_id).await?;
        executor
            .column_stats(&input.table_name, &input.column_name)
            .await
    }

    pub async fn get_sample_data(&self, input: SampleDataInput) -> DbResult<QueryOutput> {
        let executor = self.connection_manager.get(&input.connection_id).await?;
        let result = executor
            .sample_rows(&input.table_name, input.limit)
            .await?;
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnInfo, DatabaseType, SchemaMap, TableKind};

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(2048), "2 kB");
    }

    #[test]
    fn test_table_stats_output_formats_size() {
        let output = TableStatsOutput::from(TableStats {
            table: "users".into(),
            row_count_estimate: Some(10),
            size_bytes: Some(1048576),
            index_usage: vec![IndexUsage::new("PRIMARY", vec!["id".into()]).with_primary(true)],
        });
        assert_eq!(output.size_formatted.as_deref(), Some("1 MB"));

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["index_usage"][0]["is_unique"], true);
    }

    #[test]
    fn test_database_stats_output_totals() {
        let output = DatabaseStatsOutput::from(vec![
            TableStats {
                table: "orders".into(),
                row_count_estimate: Some(100),
                size_bytes: Some(1024),
                index_usage: vec![
                    IndexUsage::new("PRIMARY", vec!["id".into()]).with_primary(true),
                    IndexUsage::new("idx_user", vec!["user_id".into()]),
                ],
            },
            TableStats {
                table: "users".into(),
                row_count_estimate: None,
                size_bytes: None,
                index_usage: vec![],
            },
        ]);
        assert_eq!(output.count, 2);
        assert_eq!(output.total_size_bytes, 1024);
        assert_eq!(output.total_size_formatted, "1 kB");
        assert_eq!(output.total_indexes, 2);
        assert_eq!(output.tables[0].size_formatted.as_deref(), Some("1 kB"));
        assert!(output.tables[1].size_formatted.is_none());
    }

    #[test]
    fn test_schema_output_from_snapshot() {
        let mut tables = SchemaMap::new();
        tables.insert(
            "users".into(),
            TableSchema::new("users", TableKind::Table)
                .with_column(ColumnInfo::new("id", "int", false)),
        );
        let snapshot = CatalogSnapshot::new(DatabaseType::MySQL, tables, 3);
        let output = GetSchemaOutput::from(&snapshot);
        assert_eq!(output.count, 1);
        assert_eq!(output.generation, 3);
        assert_eq!(output.tables[0].columns[0].name, "id");
    }

    #[test]
    fn test_sample_input_limit_optional() {
        let input: SampleDataInput =
            serde_json::from_str(r#"{"connection_id": "a", "table_name": "users"}"#).unwrap();
        assert_eq!(input.limit, None);
    }
}
