//! SQLite adapter.
//!
//! The database file is opened read-only and every connection additionally
//! sets `PRAGMA query_only`, so attached or temporary databases cannot be
//! written either.

use crate::db::adapter::{
    DatabaseAdapter, collect_rows, connect_within, ensure_single_statement, process_rows,
    with_timeout,
};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, ConnectionConfig, DatabaseType, ForeignKey, IndexUsage, QueryOptions, QueryParam,
    QueryResult, SchemaMap, TableKind, TableSchema, TableStats,
};
use crate::security::quote_identifier;
use async_trait::async_trait;
use futures_util::StreamExt;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

mod queries {
    pub const SERVER_VERSION: &str = "SELECT sqlite_version()";

    pub const LIST_TABLES: &str = r#"
        SELECT name, type FROM sqlite_master
        WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#;

    pub const TABLE_COLUMNS: &str = r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?) ORDER BY cid"#;

    pub const TABLE_FOREIGN_KEYS: &str =
        r#"SELECT "from", "table", "to" FROM pragma_foreign_key_list(?) ORDER BY id, seq"#;

    pub const INDEX_LIST: &str = r#"SELECT name, "unique", origin FROM pragma_index_list(?)"#;

    pub const INDEX_COLUMNS: &str = "SELECT name FROM pragma_index_info(?) ORDER BY seqno";

    /// Needs the dbstat virtual table, which not every build compiles in.
    pub const TABLE_SIZE: &str = r#"
        SELECT SUM(pgsize) FROM dbstat
        WHERE name IN (SELECT name FROM sqlite_master WHERE tbl_name = ?)
        "#;
}

pub struct SqliteAdapter {
    pool: SqlitePool,
    introspection_timeout: Duration,
    server_version: Option<String>,
}

impl SqliteAdapter {
    pub async fn connect(config: &ConnectionConfig) -> DbResult<Self> {
        let hardening = &config.hardening;
        let pool_opts = &config.pool_options;

        let options = SqliteConnectOptions::from_str(&config.connection_string)
            .map_err(|e| {
                DbError::connection(
                    format!("Invalid SQLite connection string: {}", e),
                    "Check the connection URL format: sqlite:path/to/db.sqlite",
                )
            })?
            .read_only(true)
            .busy_timeout(hardening.statement_timeout())
            .pragma("query_only", "ON");

        let connecting = SqlitePoolOptions::new()
            .min_connections(pool_opts.min_connections_or_default())
            .max_connections(pool_opts.max_connections_or_default(true))
            .acquire_timeout(pool_opts.acquire_timeout_or_default())
            .idle_timeout(Some(pool_opts.idle_timeout_or_default()))
            .test_before_acquire(pool_opts.test_before_acquire_or_default())
            .connect_with(options);

        let pool =
            connect_within(DatabaseType::SQLite, hardening.connect_timeout(), connecting).await?;

        let mut adapter = Self::from_pool(pool, hardening.statement_timeout());
        adapter.server_version = sqlx::query_scalar::<_, String>(queries::SERVER_VERSION)
            .fetch_one(&adapter.pool)
            .await
            .ok();
        Ok(adapter)
    }

    /// Wrap an existing pool. The caller is responsible for its hardening.
    pub fn from_pool(pool: SqlitePool, introspection_timeout: Duration) -> Self {
        Self {
            pool,
            introspection_timeout,
            server_version: None,
        }
    }

    async fn table_schema(&self, name: String, kind: TableKind) -> DbResult<TableSchema> {
        let limit = self.introspection_timeout;
        let column_rows = with_timeout(
            "schema introspection",
            limit,
            sqlx::query(queries::TABLE_COLUMNS)
                .bind(name.as_str())
                .fetch_all(&self.pool),
        )
        .await?;
        let fk_rows = with_timeout(
            "schema introspection",
            limit,
            sqlx::query(queries::TABLE_FOREIGN_KEYS)
                .bind(name.as_str())
                .fetch_all(&self.pool),
        )
        .await?;

        let mut table = TableSchema::new(name, kind);
        for row in &column_rows {
            let not_null: i64 = row.try_get("notnull")?;
            let pk: i64 = row.try_get("pk")?;
            table.columns.push(ColumnInfo::new(
                row.try_get::<String, _>("name")?,
                row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
                not_null == 0 && pk == 0,
            ));
        }
        for row in &fk_rows {
            table.foreign_keys.push(ForeignKey {
                column: row.try_get("from")?,
                references_table: row.try_get("table")?,
                references_column: row.try_get("to")?,
            });
        }
        Ok(table)
    }

    async fn table_size(&self, table: &str) -> Option<u64> {
        let result = with_timeout(
            "table statistics",
            self.introspection_timeout,
            sqlx::query_scalar::<_, Option<i64>>(queries::TABLE_SIZE)
                .bind(table)
                .fetch_one(&self.pool),
        )
        .await;
        match result {
            Ok(size) => size.map(|n| n.max(0) as u64),
            Err(e) => {
                debug!(table, error = %e, "Table size unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn dialect(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn fetch_schema(&self) -> DbResult<SchemaMap> {
        let table_rows = with_timeout(
            "schema introspection",
            self.introspection_timeout,
            sqlx::query(queries::LIST_TABLES).fetch_all(&self.pool),
        )
        .await?;

        let mut tables = SchemaMap::new();
        for row in &table_rows {
            let name: String = row.try_get("name")?;
            let kind = TableKind::parse(&row.try_get::<String, _>("type")?);
            let table = self.table_schema(name.clone(), kind).await?;
            tables.insert(name, table);
        }

        debug!(count = tables.len(), "Introspected SQLite schema");
        Ok(tables)
    }

    async fn execute_readonly(
        &self,
        sql: &str,
        params: &[QueryParam],
        options: &QueryOptions,
    ) -> DbResult<QueryResult> {
        ensure_single_statement(DatabaseType::SQLite, sql)?;
        let start = Instant::now();
        let fetch_limit = options.row_limit as usize + 1;

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows_future = query.fetch(&self.pool).take(fetch_limit).collect::<Vec<_>>();

        let results = tokio::time::timeout(options.timeout, rows_future)
            .await
            .map_err(|_| DbError::timeout("query execution", options.timeout))?;
        let rows: Vec<SqliteRow> = collect_rows(results)?;
        Ok(process_rows(rows, options.row_limit, start))
    }

    async fn fetch_stats(&self, table: &str) -> DbResult<TableStats> {
        let limit = self.introspection_timeout;
        let count_sql = format!(
            "SELECT COUNT(*) FROM {}",
            quote_identifier(table, DatabaseType::SQLite)
        );
        let row_count: i64 = with_timeout(
            "table statistics",
            limit,
            sqlx::query_scalar(&count_sql).fetch_one(&self.pool),
        )
        .await?;

        let index_rows = with_timeout(
            "table statistics",
            limit,
            sqlx::query(queries::INDEX_LIST)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;

        let mut index_usage = Vec::with_capacity(index_rows.len());
        for row in &index_rows {
            let name: String = row.try_get("name")?;
            let unique: i64 = row.try_get("unique")?;
            let origin: String = row.try_get("origin")?;
            let columns: Vec<Option<String>> = with_timeout(
                "table statistics",
                limit,
                sqlx::query_scalar(queries::INDEX_COLUMNS)
                    .bind(name.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
            index_usage.push(
                IndexUsage::new(name, columns.into_iter().flatten().collect())
                    .with_unique(unique != 0)
                    .with_primary(origin == "pk"),
            );
        }

        Ok(TableStats {
            table: table.to_string(),
            row_count_estimate: Some(row_count),
            size_bytes: self.table_size(table).await,
            index_usage,
        })
    }

    async fn server_version(&self) -> Option<String> {
        self.server_version.clone()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}
