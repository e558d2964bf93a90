//! Connection registry.
//!
//! Maps connection ids to their [`SafeExecutor`]. Each executor owns one
//! adapter (and so one pool) plus that connection's schema catalog.

use crate::db::adapter::{self, DatabaseAdapter};
use crate::db::executor::SafeExecutor;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, ConnectionInfo, DatabaseType, QueryOptions};
use crate::security::ValidationMode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Connection information returned by list_connections (no secrets exposed).
#[derive(Debug, Clone, serde::Serialize, schemars::JsonSchema)]
pub struct ConnectionSummary {
    /// Connection identifier. Use this value in connection_id parameter for all tool calls.
    pub id: String,
    /// Database type: "postgresql", "mysql", or "sqlite"
    pub db_type: DatabaseType,
    /// Validation mode applied to free SQL on this connection.
    pub mode: ValidationMode,
    /// Database name from connection URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

#[derive(Debug)]
struct Entry {
    executor: Arc<SafeExecutor>,
    database: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionManager {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    mode: ValidationMode,
    catalog_ttl: Duration,
    defaults: QueryOptions,
}

impl ConnectionManager {
    pub fn new(mode: ValidationMode, catalog_ttl: Duration, defaults: QueryOptions) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            mode,
            catalog_ttl,
            defaults,
        }
    }

    /// Open, harden and register a connection.
    pub async fn connect(&self, config: ConnectionConfig) -> DbResult<ConnectionInfo> {
        // Early check for existing connection
        if self.exists(&config.id).await {
            return Err(duplicate(&config.id));
        }
        let adapter = adapter::connect(&config).await?;
        self.register(config, adapter).await
    }

    /// Register an already-open adapter under `config.id`.
    pub async fn register(
        &self,
        config: ConnectionConfig,
        adapter: Arc<dyn DatabaseAdapter>,
    ) -> DbResult<ConnectionInfo> {
        let server_version = adapter.server_version().await;
        let executor = Arc::new(SafeExecutor::new(
            adapter,
            self.mode,
            self.catalog_ttl,
            self.defaults,
        ));

        // Re-check under the write lock; a concurrent connect may have won.
        let rejected = {
            let mut entries = self.entries.write().await;
            if entries.contains_key(&config.id) {
                Some(executor)
            } else {
                entries.insert(
                    config.id.clone(),
                    Entry {
                        executor,
                        database: config.database.clone(),
                    },
                );
                None
            }
        };
        if let Some(executor) = rejected {
            executor.close().await;
            return Err(duplicate(&config.id));
        }

        info!(connection_id = %config.id, mode = %self.mode, "Connection registered");
        Ok(ConnectionInfo {
            connection_id: config.id,
            database_type: config.db_type,
            server_version,
            database: config.database,
        })
    }

    pub async fn get(&self, connection_id: &str) -> DbResult<Arc<SafeExecutor>> {
        let entries = self.entries.read().await;
        entries
            .get(connection_id)
            .map(|entry| Arc::clone(&entry.executor))
            .ok_or_else(|| DbError::connection_not_found(connection_id))
    }

    pub async fn exists(&self, connection_id: &str) -> bool {
        self.entries.read().await.contains_key(connection_id)
    }

    /// All registered connections, sorted by id.
    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let entries = self.entries.read().await;
        let mut summaries: Vec<_> = entries
            .iter()
            .map(|(id, entry)| ConnectionSummary {
                id: id.clone(),
                db_type: entry.executor.dialect(),
                mode: entry.executor.mode(),
                database: entry.database.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub async fn connection_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Close every pool and discard every catalog.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.entries.write().await.drain().collect();
        for (id, entry) in drained {
            info!(connection_id = %id, "Closing connection");
            entry.executor.close().await;
        }
        info!("All connections closed");
    }
}

fn duplicate(connection_id: &str) -> DbError {
    DbError::connection(
        format!("Connection '{}' already exists", connection_id),
        "Use a different connection ID",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteAdapter;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn sqlite_adapter() -> Arc<dyn DatabaseAdapter> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        Arc::new(SqliteAdapter::from_pool(pool, Duration::from_secs(5)))
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            ValidationMode::StrictReadOnly,
            Duration::from_secs(60),
            QueryOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_ids() {
        let manager = manager();
        let config = ConnectionConfig::new("main", "sqlite::memory:").unwrap();
        manager
            .register(config.clone(), sqlite_adapter().await)
            .await
            .unwrap();

        let err = manager
            .register(config, sqlite_adapter().await)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(manager.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_connection() {
        let err = manager().get("missing").await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_and_close_all() {
        let manager = manager();
        for id in ["b", "a"] {
            let config = ConnectionConfig::new(id, "sqlite::memory:").unwrap();
            manager.register(config, sqlite_adapter().await).await.unwrap();
        }
        let ids: Vec<_> = manager.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(manager.list().await[0].db_type, DatabaseType::SQLite);

        manager.close_all().await;
        assert_eq!(manager.connection_count().await, 0);
    }
}
