//! Schema catalog refresh behaviour under concurrency and failure.
//!
//! Uses an in-memory adapter that counts introspection calls and can be made
//! slow or failing on demand.

use async_trait::async_trait;
use db_guard_mcp::db::{DatabaseAdapter, SchemaCatalog};
use db_guard_mcp::error::{DbError, DbResult, ReasonCode};
use db_guard_mcp::models::{
    ColumnInfo, DatabaseType, QueryOptions, QueryParam, QueryResult, SchemaMap, TableKind,
    TableSchema, TableStats,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

struct CountingAdapter {
    fetches: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
}

impl CountingAdapter {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseAdapter for CountingAdapter {
    fn dialect(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn fetch_schema(&self) -> DbResult<SchemaMap> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(DbError::adapter("relation \"pg_class\" is unavailable", None));
        }
        let mut tables = SchemaMap::new();
        tables.insert(
            "users".to_string(),
            TableSchema::new("users", TableKind::Table)
                .with_column(ColumnInfo::new("id", "integer", false))
                .with_column(ColumnInfo::new("name", "text", true)),
        );
        Ok(tables)
    }

    async fn execute_readonly(
        &self,
        _sql: &str,
        _params: &[QueryParam],
        _options: &QueryOptions,
    ) -> DbResult<QueryResult> {
        Err(DbError::internal("not used"))
    }

    async fn fetch_stats(&self, _table: &str) -> DbResult<TableStats> {
        Err(DbError::internal("not used"))
    }
}

#[tokio::test]
async fn test_concurrent_snapshots_share_one_introspection() {
    let adapter = CountingAdapter::new(Duration::from_millis(100));
    let catalog = Arc::new(SchemaCatalog::new(
        DatabaseType::PostgreSQL,
        Duration::from_secs(60),
    ));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let adapter = Arc::clone(&adapter);
        let catalog = Arc::clone(&catalog);
        handles.push(tokio::spawn(async move {
            catalog.snapshot(adapter.as_ref()).await.map(|s| s.generation())
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    assert_eq!(adapter.fetches(), 1);
}

#[tokio::test]
async fn test_concurrent_refreshes_coalesce() {
    let adapter = CountingAdapter::new(Duration::from_millis(100));
    let catalog = Arc::new(SchemaCatalog::new(
        DatabaseType::PostgreSQL,
        Duration::from_secs(60),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let adapter = Arc::clone(&adapter);
        let catalog = Arc::clone(&catalog);
        handles.push(tokio::spawn(async move {
            catalog.refresh(adapter.as_ref()).await.map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // The first refresh runs; everyone queued behind it reuses its result.
    assert_eq!(adapter.fetches(), 1);
    assert_eq!(catalog.current().await.unwrap().generation(), 1);
}

#[tokio::test]
async fn test_fresh_snapshot_is_reused() {
    let adapter = CountingAdapter::new(Duration::ZERO);
    let catalog = SchemaCatalog::new(DatabaseType::PostgreSQL, Duration::from_secs(60));

    catalog.snapshot(adapter.as_ref()).await.unwrap();
    catalog.snapshot(adapter.as_ref()).await.unwrap();
    assert!(catalog.is_known_table(adapter.as_ref(), "users").await.unwrap());
    assert!(
        catalog
            .is_known_column(adapter.as_ref(), "users", "name")
            .await
            .unwrap()
    );
    assert!(!catalog.is_known_table(adapter.as_ref(), "orders").await.unwrap());

    assert_eq!(adapter.fetches(), 1);
}

#[tokio::test]
async fn test_expired_snapshot_refreshes() {
    let adapter = CountingAdapter::new(Duration::ZERO);
    let catalog = SchemaCatalog::new(DatabaseType::PostgreSQL, Duration::from_millis(20));

    let first = catalog.snapshot(adapter.as_ref()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    let second = catalog.snapshot(adapter.as_ref()).await.unwrap();

    assert_eq!(adapter.fetches(), 2);
    assert_eq!(first.generation(), 1);
    assert_eq!(second.generation(), 2);
}

#[tokio::test]
async fn test_invalidate_forces_refresh() {
    let adapter = CountingAdapter::new(Duration::ZERO);
    let catalog = SchemaCatalog::new(DatabaseType::PostgreSQL, Duration::from_secs(60));

    catalog.snapshot(adapter.as_ref()).await.unwrap();
    catalog.invalidate();
    catalog.snapshot(adapter.as_ref()).await.unwrap();

    assert_eq!(adapter.fetches(), 2);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let adapter = CountingAdapter::new(Duration::ZERO);
    let catalog = SchemaCatalog::new(DatabaseType::PostgreSQL, Duration::from_secs(60));

    let before = catalog.snapshot(adapter.as_ref()).await.unwrap();
    adapter.fail.store(true, Ordering::SeqCst);

    let err = catalog.refresh(adapter.as_ref()).await.unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::AdapterError);
    assert!(err.to_string().contains("Schema introspection failed"));

    let current = catalog.current().await.unwrap();
    assert_eq!(current.generation(), before.generation());
    assert!(current.is_known_table("users"));

    // Still within its TTL, so reads keep using the last good snapshot.
    adapter.fail.store(false, Ordering::SeqCst);
    let reused = catalog.snapshot(adapter.as_ref()).await.unwrap();
    assert_eq!(reused.generation(), 1);
    assert_eq!(adapter.fetches(), 2);
}

#[tokio::test]
async fn test_failed_refresh_after_invalidate_retries() {
    let adapter = CountingAdapter::new(Duration::ZERO);
    let catalog = SchemaCatalog::new(DatabaseType::PostgreSQL, Duration::from_secs(60));

    catalog.snapshot(adapter.as_ref()).await.unwrap();
    adapter.fail.store(true, Ordering::SeqCst);
    catalog.invalidate();

    let err = catalog.snapshot(adapter.as_ref()).await.unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::AdapterError);

    // An invalidated snapshot is never served again; the next read retries.
    adapter.fail.store(false, Ordering::SeqCst);
    let after = catalog.snapshot(adapter.as_ref()).await.unwrap();
    assert_eq!(after.generation(), 2);
    assert_eq!(adapter.fetches(), 3);
}
