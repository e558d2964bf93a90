//! MCP service implementation using rmcp.
//!
//! Tool names use the plain form without a `db_` prefix. Every failure is
//! returned as a structured error whose `data` carries the reason code.

use crate::db::{ConnectionManager, ConnectionSummary};
use crate::error::DbError;
use crate::models::ColumnStats;
use crate::tools::query::{ExplainInput, QueryInput, QueryOutput, QueryToolHandler};
use crate::tools::schema::{
    ColumnStatsInput, ConnectionInput, DatabaseStatsOutput, DbStatusOutput, GetSchemaOutput,
    RefreshSchemaOutput, SampleDataInput, SchemaToolHandler, TableStatsInput, TableStatsOutput,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use std::sync::Arc;

/// Output for the list_connections tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListConnectionsOutput {
    /// List of available database connections
    pub connections: Vec<ConnectionSummary>,
    /// Number of connections
    pub count: usize,
}

#[derive(Clone)]
pub struct DbService {
    connection_manager: Arc<ConnectionManager>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl DbService {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self {
            connection_manager,
            tool_router: Self::tool_router(),
        }
    }

    /// Validate connection ID - ensure it is provided and non-empty.
    ///
    /// Returns the trimmed connection ID if valid. A missing ID is still an
    /// invalid-params error, but its `data` carries `CONNECTION_ERROR` like
    /// every other failure.
    fn validate_connection_id(&self, provided: &str) -> Result<String, McpError> {
        let trimmed = provided.trim();
        if trimmed.is_empty() {
            let err = DbError::connection(
                "connection_id is required",
                "Call list_connections first to get available database IDs",
            );
            Err(McpError::invalid_params(err.to_string(), Some(err.payload())))
        } else {
            Ok(trimmed.to_string())
        }
    }

    fn query_handler(&self) -> QueryToolHandler {
        QueryToolHandler::new(self.connection_manager.clone())
    }

    fn schema_handler(&self) -> SchemaToolHandler {
        SchemaToolHandler::new(self.connection_manager.clone())
    }
}

#[tool_router]
impl DbService {
    #[tool(
        description = "List all available database connections.\nReturns connection IDs, types (MySQL/PostgreSQL/SQLite) and the validation mode applied to SQL."
    )]
    async fn list_connections(&self) -> Json<ListConnectionsOutput> {
        let connections = self.connection_manager.list().await;
        let count = connections.len();
        Json(ListConnectionsOutput { connections, count })
    }

    #[tool(
        description = "Run one read-only SELECT statement and return the rows.\nUse params with ?, or $1,$2... on PostgreSQL, for values. Table and column names cannot be parameters.\nRejected before execution: multiple statements, any write/DDL/privilege/session verb, file access functions, and comment tricks. Errors carry a reason_code."
    )]
    async fn query(
        &self,
        Parameters(input): Parameters<QueryInput>,
    ) -> Result<Json<QueryOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.query_handler().query(input).await?))
    }

    #[tool(
        description = "Show the execution plan of a SELECT statement without running it.\nThe statement is validated exactly like `query`. EXPLAIN ANALYZE is not available."
    )]
    async fn explain(
        &self,
        Parameters(input): Parameters<ExplainInput>,
    ) -> Result<Json<QueryOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.query_handler().explain(input).await?))
    }

    #[tool(
        description = "Get the cached schema: every table and view with its columns and foreign keys.\nTable and column names used by the other tools must match these names."
    )]
    async fn get_schema(
        &self,
        Parameters(input): Parameters<ConnectionInput>,
    ) -> Result<Json<GetSchemaOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.schema_handler().get_schema(input).await?))
    }

    #[tool(
        description = "Re-read the schema from the database now instead of waiting for the cache to expire."
    )]
    async fn refresh_schema(
        &self,
        Parameters(input): Parameters<ConnectionInput>,
    ) -> Result<Json<RefreshSchemaOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.schema_handler().refresh_schema(input).await?))
    }

    #[tool(
        description = "Get row count estimate, on-disk size and indexes for one table.\nThe table must exist in get_schema."
    )]
    async fn get_table_stats(
        &self,
        Parameters(input): Parameters<TableStatsInput>,
    ) -> Result<Json<TableStatsOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.schema_handler().get_table_stats(input).await?))
    }

    #[tool(
        description = "Get row estimate, size and indexes for every table in get_schema, plus database totals.\nViews are left out. On large schemas prefer get_table_stats for the tables you need."
    )]
    async fn get_database_stats(
        &self,
        Parameters(input): Parameters<ConnectionInput>,
    ) -> Result<Json<DatabaseStatsOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.schema_handler().get_database_stats(input).await?))
    }

    #[tool(
        description = "Get connection status: dialect, server version, validation mode, and the schema cache generation and age.\nDoes not query the database schema."
    )]
    async fn get_db_status(
        &self,
        Parameters(input): Parameters<ConnectionInput>,
    ) -> Result<Json<DbStatusOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.schema_handler().get_db_status(input).await?))
    }

    #[tool(
        description = "Get total, non-null, null and distinct counts for one column.\nThe table and column must exist in get_schema."
    )]
    async fn get_column_stats(
        &self,
        Parameters(input): Parameters<ColumnStatsInput>,
    ) -> Result<Json<ColumnStats>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.schema_handler().get_column_stats(input).await?))
    }

    #[tool(
        description = "Get the first rows of a table (default 5, max 100).\nThe table must exist in get_schema."
    )]
    async fn get_sample_data(
        &self,
        Parameters(input): Parameters<SampleDataInput>,
    ) -> Result<Json<QueryOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        Ok(Json(self.schema_handler().get_sample_data(input).await?))
    }
}

#[tool_handler]
impl ServerHandler for DbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "db-guard-mcp".to_owned(),
                title: Some("DB Guard MCP".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read-only database inspection tools.\n\
                \n\
                ## Workflow\n\
                1. Call `list_connections` to get available database IDs\n\
                2. Call `get_schema` to see which tables and columns exist\n\
                3. Use `query` for one SELECT at a time, or the stats and sample tools\n\
                \n\
                ## Rules\n\
                - Every connection is read-only. Writes, DDL, SET, SHOW and file access are rejected.\n\
                - One statement per call. A single trailing semicolon is fine.\n\
                - Rejections carry `reason_code` (e.g. FORBIDDEN_VERB, MULTIPLE_STATEMENTS) in the error data.\n\
                - Timed-out statements are not retried. Narrow the query or raise `timeout_secs`.\n\
                \n\
                ## Error: Missing connection_id\n\
                If you see \"connection_id is required\", call `list_connections` first."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryOptions;
    use crate::security::ValidationMode;
    use std::time::Duration;

    fn create_test_service() -> DbService {
        let manager = Arc::new(ConnectionManager::new(
            ValidationMode::StrictReadOnly,
            Duration::from_secs(60),
            QueryOptions::default(),
        ));
        DbService::new(manager)
    }

    #[test]
    fn test_validate_connection_id_trims_whitespace() {
        let service = create_test_service();
        assert_eq!(service.validate_connection_id("  mydb  ").unwrap(), "mydb");
    }

    #[test]
    fn test_validate_connection_id_rejects_whitespace_only() {
        let service = create_test_service();
        let err = service.validate_connection_id("   ").unwrap_err();
        assert!(err.to_string().contains("connection_id is required"));
    }

    #[test]
    fn test_missing_connection_id_carries_reason_code() {
        let service = create_test_service();
        let err = service.validate_connection_id("").unwrap_err();
        assert_eq!(err.code.0, -32602);
        let data = err.data.unwrap();
        assert_eq!(data["reason_code"], "CONNECTION_ERROR");
        assert_eq!(data["message"], "Connection failed: connection_id is required");
        assert!(
            data["suggestion"]
                .as_str()
                .unwrap()
                .contains("list_connections")
        );
    }

    #[tokio::test]
    async fn test_status_tools_reject_unknown_connection() {
        let service = create_test_service();
        let input = ConnectionInput {
            connection_id: "missing".into(),
        };
        let err = service
            .get_db_status(Parameters(input.clone()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.data.unwrap()["reason_code"], "CONNECTION_ERROR");

        let err = service
            .get_database_stats(Parameters(input))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code.0, -32002);
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "db-guard-mcp");
        assert!(info.capabilities.tools.is_some());
    }
}
