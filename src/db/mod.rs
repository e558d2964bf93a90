//! Database access layer.
//!
//! - `adapter`: the dialect-polymorphic [`DatabaseAdapter`] and its hardened connect
//! - `mysql`, `postgres`, `sqlite`: one adapter per dialect
//! - `types`: row decoding into JSON
//! - `catalog`: cached schema snapshots used for identifier whitelisting
//! - `executor`: [`SafeExecutor`], the validate-then-execute path
//! - `pool`: the connection registry

pub mod adapter;
pub mod catalog;
pub mod executor;
pub mod mysql;
pub mod pool;
pub mod postgres;
pub mod sqlite;
pub mod types;

pub use adapter::DatabaseAdapter;
pub use catalog::{CatalogSnapshot, SchemaCatalog};
pub use executor::SafeExecutor;
pub use pool::{ConnectionManager, ConnectionSummary};
