//! Per-connection schema catalog.
//!
//! The catalog holds an immutable [`CatalogSnapshot`] behind an `Arc`. Readers
//! clone the `Arc` and validate against it; a refresh builds a complete new
//! snapshot off to the side and swaps the pointer, so no reader ever sees a
//! half-built table map.
//!
//! Refreshes are serialized by a mutex. Callers that queue behind an
//! in-flight refresh re-check freshness once they get the lock and reuse the
//! result instead of issuing their own introspection round-trip.

use crate::db::adapter::DatabaseAdapter;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, SchemaMap, TableSchema};
use crate::security::identifier::CaseRule;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// An immutable view of a database's tables and columns.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    dialect: DatabaseType,
    case_rule: CaseRule,
    tables: SchemaMap,
    generation: u64,
    fetched_at: Instant,
    refreshed_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn new(dialect: DatabaseType, tables: SchemaMap, generation: u64) -> Self {
        Self {
            dialect,
            case_rule: CaseRule::for_dialect(dialect),
            tables,
            generation,
            fetched_at: Instant::now(),
            refreshed_at: Utc::now(),
        }
    }

    /// A snapshot with no tables; every identifier lookup fails against it.
    pub fn empty(dialect: DatabaseType) -> Self {
        Self::new(dialect, SchemaMap::new(), 0)
    }

    pub fn dialect(&self) -> DatabaseType {
        self.dialect
    }

    pub fn tables(&self) -> &SchemaMap {
        &self.tables
    }

    /// Table by its exact catalog name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Time since this snapshot was built.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    /// Table lookup under the dialect's case rule.
    pub fn resolve_table(&self, name: &str) -> Option<&TableSchema> {
        if let Some(table) = self.tables.get(name) {
            return Some(table);
        }
        self.tables
            .values()
            .find(|t| self.case_rule.table_matches(name, &t.name))
    }

    pub fn resolve_column(&self, table: &str, column: &str) -> Option<&str> {
        self.resolve_table(table)?
            .columns
            .iter()
            .find(|c| self.case_rule.column_matches(column, &c.name))
            .map(|c| c.name.as_str())
    }

    pub fn is_known_table(&self, name: &str) -> bool {
        self.resolve_table(name).is_some()
    }

    pub fn is_known_column(&self, table: &str, column: &str) -> bool {
        self.resolve_column(table, column).is_some()
    }
}

/// Cached, TTL-bound schema for one connection.
pub struct SchemaCatalog {
    dialect: DatabaseType,
    ttl: Duration,
    current: RwLock<Option<Arc<CatalogSnapshot>>>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
    /// Set by [`invalidate`](Self::invalidate); forces the next read to refresh.
    stale: AtomicBool,
}

impl SchemaCatalog {
    pub fn new(dialect: DatabaseType, ttl: Duration) -> Self {
        Self {
            dialect,
            ttl,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            stale: AtomicBool::new(false),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current snapshot without refreshing, if one was ever built.
    pub async fn current(&self) -> Option<Arc<CatalogSnapshot>> {
        self.current.read().await.clone()
    }

    /// A fresh snapshot, refreshing first when missing, expired or invalidated.
    ///
    /// Concurrent callers that all find the cache stale share one refresh.
    pub async fn snapshot(&self, adapter: &dyn DatabaseAdapter) -> DbResult<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(snapshot) = self.fresh().await {
            debug!(
                generation = snapshot.generation,
                "Reusing catalog refreshed by a concurrent caller"
            );
            return Ok(snapshot);
        }
        self.rebuild(adapter).await
    }

    /// Force a refresh. Calls that arrive while another refresh is running
    /// return that refresh's result.
    pub async fn refresh(&self, adapter: &dyn DatabaseAdapter) -> DbResult<Arc<CatalogSnapshot>> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(snapshot) = self.current().await {
                return Ok(snapshot);
            }
        }
        self.rebuild(adapter).await
    }

    /// Mark the cached snapshot stale; the next [`snapshot`](Self::snapshot) refreshes.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
        debug!(dialect = %self.dialect, "Schema catalog invalidated");
    }

    /// Drop the cached snapshot entirely.
    pub async fn clear(&self) {
        *self.current.write().await = None;
    }

    pub async fn is_known_table(&self, adapter: &dyn DatabaseAdapter, name: &str) -> DbResult<bool> {
        Ok(self.snapshot(adapter).await?.is_known_table(name))
    }

    pub async fn is_known_column(
        &self,
        adapter: &dyn DatabaseAdapter,
        table: &str,
        column: &str,
    ) -> DbResult<bool> {
        Ok(self.snapshot(adapter).await?.is_known_column(table, column))
    }

    async fn fresh(&self) -> Option<Arc<CatalogSnapshot>> {
        if self.stale.load(Ordering::Acquire) {
            return None;
        }
        self.current
            .read()
            .await
            .as_ref()
            .filter(|snapshot| !snapshot.is_expired(self.ttl))
            .cloned()
    }

    /// Introspect and swap. Caller must hold `refresh_lock`.
    async fn rebuild(&self, adapter: &dyn DatabaseAdapter) -> DbResult<Arc<CatalogSnapshot>> {
        // Cleared first so an invalidation during the fetch is not lost.
        let was_stale = self.stale.swap(false, Ordering::AcqRel);
        let started = Instant::now();
        let tables = match adapter.fetch_schema().await {
            Ok(tables) => tables,
            Err(err) => {
                // The previous snapshot stays usable unless it was already distrusted.
                if was_stale {
                    self.stale.store(true, Ordering::Release);
                }
                warn!(dialect = %self.dialect, error = %err, "Schema introspection failed");
                return Err(match err {
                    DbError::Timeout { .. } | DbError::Connection { .. } => err,
                    other => DbError::adapter(
                        format!("Schema introspection failed: {}", other),
                        None,
                    ),
                });
            }
        };

        let generation = self.generation.load(Ordering::Acquire) + 1;
        let snapshot = Arc::new(CatalogSnapshot::new(self.dialect, tables, generation));
        *self.current.write().await = Some(Arc::clone(&snapshot));
        self.generation.store(generation, Ordering::Release);

        info!(
            dialect = %self.dialect,
            tables = snapshot.table_count(),
            generation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Schema catalog refreshed"
        );
        Ok(snapshot)
    }
}

impl std::fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCatalog")
            .field("dialect", &self.dialect)
            .field("ttl", &self.ttl)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
