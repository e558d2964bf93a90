//! DB Guard MCP library.
//!
//! Read-only MCP tools over MySQL/MariaDB, PostgreSQL and SQLite. Every
//! statement is checked by [`security::QueryValidator`] before it can reach a
//! hardened, read-only database session.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod security;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use mcp::DbService;
