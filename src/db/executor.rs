//! Validated execution.
//!
//! [`SafeExecutor`] is the only path from a caller to
//! [`DatabaseAdapter::execute_readonly`]. Each call runs one pass:
//! validate, then either reject or execute once under a deadline. A statement
//! that times out or fails is reported, never retried.
//!
//! The convenience operations (stats, sampling, explain) build their SQL from
//! catalog-resolved identifiers and still route it through the validator in
//! strict mode.

use crate::db::adapter::DatabaseAdapter;
use crate::db::catalog::{CatalogSnapshot, SchemaCatalog};
use crate::error::{DbError, DbResult, ReasonCode};
use crate::models::{
    ColumnStats, DEFAULT_SAMPLE_LIMIT, DatabaseType, MAX_SAMPLE_LIMIT, QueryOptions, QueryParam,
    QueryResult, TableKind, TableStats,
};
use crate::security::rules::forbidden_verb;
use crate::security::{
    Identifier, QueryValidator, ResolvedIdentifier, ValidationMode, ValidationVerdict, VerbClass,
    quote_identifier,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct SafeExecutor {
    adapter: Arc<dyn DatabaseAdapter>,
    validator: QueryValidator,
    catalog: SchemaCatalog,
    mode: ValidationMode,
    defaults: QueryOptions,
}

impl SafeExecutor {
    pub fn new(
        adapter: Arc<dyn DatabaseAdapter>,
        mode: ValidationMode,
        catalog_ttl: Duration,
        defaults: QueryOptions,
    ) -> Self {
        let dialect = adapter.dialect();
        Self {
            adapter,
            validator: QueryValidator::new(dialect),
            catalog: SchemaCatalog::new(dialect, catalog_ttl),
            mode,
            defaults,
        }
    }

    pub fn dialect(&self) -> DatabaseType {
        self.validator.dialect()
    }

    /// The configured validation mode.
    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn adapter(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.adapter
    }

    /// Default bounds with caller overrides applied.
    pub fn options(&self, limit: Option<u32>, timeout_secs: Option<u64>) -> QueryOptions {
        self.defaults.with_overrides(limit, timeout_secs)
    }

    /// Validate without executing.
    ///
    /// The catalog is consulted (and refreshed if expired) only when
    /// identifiers are supplied; free SQL text is checked on its own.
    pub async fn validate(
        &self,
        sql: &str,
        identifiers: &[Identifier],
        mode: ValidationMode,
    ) -> DbResult<ValidationVerdict> {
        let verdict = if identifiers.is_empty() {
            self.validator.check_sql(sql, mode)
        } else {
            let snapshot = self.catalog.snapshot(self.adapter.as_ref()).await?;
            self.validator.validate(sql, identifiers, &snapshot, mode)
        };
        if let Some(rejection) = verdict.rejection() {
            self.note_rejection(rejection.code, rejection.token.as_deref());
        }
        Ok(verdict)
    }

    /// Validate, then execute once.
    pub async fn run(
        &self,
        sql: &str,
        params: &[QueryParam],
        identifiers: &[Identifier],
        mode: ValidationMode,
        options: &QueryOptions,
    ) -> DbResult<QueryResult> {
        self.validate(sql, identifiers, mode).await?.into_result()?;

        let statement = self.validator.statement_text(sql);
        debug!(
            dialect = %self.dialect(),
            sql = %statement,
            params = params.len(),
            limit = options.row_limit,
            timeout_ms = options.timeout.as_millis() as u64,
            "Executing validated statement"
        );

        match self.adapter.execute_readonly(statement, params, options).await {
            Ok(result) => {
                debug!(
                    rows = result.row_count(),
                    truncated = result.truncated,
                    elapsed_ms = result.execution_time_ms,
                    "Statement completed"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(reason = %err.reason_code(), error = %err, "Statement failed");
                Err(err)
            }
        }
    }

    /// `run` with the configured mode.
    pub async fn query(
        &self,
        sql: &str,
        params: &[QueryParam],
        options: &QueryOptions,
    ) -> DbResult<QueryResult> {
        self.run(sql, params, &[], self.mode, options).await
    }

    /// Validate `sql` in the configured mode, then fetch its plan without running it.
    pub async fn explain(&self, sql: &str) -> DbResult<QueryResult> {
        self.validate(sql, &[], self.mode).await?.into_result()?;

        let statement = self.validator.statement_text(sql);
        let already_explain = statement
            .split_whitespace()
            .next()
            .is_some_and(|word| word.eq_ignore_ascii_case("EXPLAIN"));
        let plan_sql = if already_explain {
            statement.to_string()
        } else {
            let prefix = match self.dialect() {
                DatabaseType::MySQL => "EXPLAIN FORMAT=JSON",
                DatabaseType::PostgreSQL => "EXPLAIN (FORMAT JSON)",
                DatabaseType::SQLite => "EXPLAIN QUERY PLAN",
            };
            format!("{} {}", prefix, statement)
        };

        let options = self.options(None, None);
        self.run(&plan_sql, &[], &[], ValidationMode::StrictReadOnly, &options)
            .await
    }

    /// Current snapshot, refreshing if expired.
    pub async fn schema(&self) -> DbResult<Arc<CatalogSnapshot>> {
        self.catalog.snapshot(self.adapter.as_ref()).await
    }

    /// Invalidate and rebuild the catalog now.
    pub async fn refresh_schema(&self) -> DbResult<Arc<CatalogSnapshot>> {
        self.catalog.invalidate();
        self.catalog.refresh(self.adapter.as_ref()).await
    }

    pub async fn table_stats(&self, table: &str) -> DbResult<TableStats> {
        let resolved = self.resolve(Identifier::table(table)).await?;
        self.adapter.fetch_stats(&resolved.table).await
    }

    /// Stats for every base table in the catalog, in catalog order.
    ///
    /// Views are skipped; they have no storage or indexes of their own. The
    /// names come straight from the snapshot, so no whitelist pass is needed.
    pub async fn database_stats(&self) -> DbResult<Vec<TableStats>> {
        let snapshot = self.catalog.snapshot(self.adapter.as_ref()).await?;
        let mut stats = Vec::with_capacity(snapshot.table_count());
        for table in snapshot
            .tables()
            .values()
            .filter(|t| t.kind == TableKind::Table)
        {
            stats.push(self.adapter.fetch_stats(&table.name).await?);
        }
        debug!(
            tables = stats.len(),
            generation = snapshot.generation(),
            "Database statistics fetched"
        );
        Ok(stats)
    }

    pub async fn server_version(&self) -> Option<String> {
        self.adapter.server_version().await
    }

    pub async fn column_stats(&self, table: &str, column: &str) -> DbResult<ColumnStats> {
        let resolved = self.resolve(Identifier::column(table, column)).await?;
        let column_name = resolved.column.as_deref().unwrap_or(column);
        let quoted_table = quote_identifier(&resolved.table, self.dialect());
        let quoted_column = quote_identifier(column_name, self.dialect());

        let sql = format!(
            "SELECT COUNT(*) AS total_rows, COUNT({col}) AS non_null_count, \
             COUNT(DISTINCT {col}) AS distinct_count FROM {table}",
            col = quoted_column,
            table = quoted_table,
        );
        let options = self.options(Some(1), None);
        let result = self
            .run(&sql, &[], &[], ValidationMode::StrictReadOnly, &options)
            .await?;

        let row = result
            .rows
            .first()
            .ok_or_else(|| DbError::internal("Column statistics returned no rows"))?;
        let count = |name: &str| row.get(name).and_then(JsonValue::as_i64).unwrap_or(0);
        let total_rows = count("total_rows");
        let non_null_count = count("non_null_count");

        Ok(ColumnStats {
            table: resolved.table.clone(),
            column: column_name.to_string(),
            total_rows,
            non_null_count,
            null_count: total_rows - non_null_count,
            distinct_count: count("distinct_count"),
        })
    }

    /// First `limit` rows of a whitelisted table.
    pub async fn sample_rows(&self, table: &str, limit: Option<u32>) -> DbResult<QueryResult> {
        let resolved = self.resolve(Identifier::table(table)).await?;
        let limit = limit
            .unwrap_or(DEFAULT_SAMPLE_LIMIT)
            .clamp(1, MAX_SAMPLE_LIMIT);
        let placeholder = match self.dialect() {
            DatabaseType::PostgreSQL => "$1",
            DatabaseType::MySQL | DatabaseType::SQLite => "?",
        };
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            quote_identifier(&resolved.table, self.dialect()),
            placeholder
        );
        let params = [QueryParam::Int(i64::from(limit))];
        let options = self.options(Some(limit), None);
        self.run(&sql, &params, &[], ValidationMode::StrictReadOnly, &options)
            .await
    }

    pub async fn close(&self) {
        self.adapter.close().await;
        self.catalog.clear().await;
    }

    /// Whitelist one identifier against a fresh snapshot.
    async fn resolve(&self, identifier: Identifier) -> DbResult<ResolvedIdentifier> {
        let snapshot = self.catalog.snapshot(self.adapter.as_ref()).await?;
        self.validator
            .check_identifier(&identifier, &snapshot)
            .map_err(|rejection| {
                self.note_rejection(rejection.code, rejection.token.as_deref());
                DbError::Rejected(rejection)
            })
    }

    /// A rejected DDL verb means someone tried to change the schema; the next
    /// identifier lookup should not trust the cached snapshot.
    fn note_rejection(&self, code: ReasonCode, token: Option<&str>) {
        if code != ReasonCode::ForbiddenVerb {
            return;
        }
        if token.and_then(forbidden_verb) == Some(VerbClass::Ddl) {
            self.catalog.invalidate();
        }
    }
}

impl std::fmt::Debug for SafeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeExecutor")
            .field("dialect", &self.dialect())
            .field("mode", &self.mode)
            .field("catalog", &self.catalog)
            .finish()
    }
}
