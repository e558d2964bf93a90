//! Error types for the DB Guard MCP Server.
//!
//! Every failure the server can report carries a [`ReasonCode`] from a closed
//! taxonomy. Validation rejections and execution failures share one error enum
//! so tool handlers can propagate both with `?`, while callers can still tell
//! them apart through [`DbError::reason_code`].

use schemars::JsonSchema;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Closed taxonomy of rejection and failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    // Validation-time
    MultipleStatements,
    ForbiddenVerb,
    MysqlDangerousKeyword,
    PostgresqlDangerousKeyword,
    SqliteDangerousKeyword,
    CommentBypassAttempt,
    IdentifierNotWhitelisted,
    DangerousIdentifierPattern,
    ReadOnlyViolation,
    EmptyQuery,
    UnterminatedLiteral,
    // Execution-time
    ConnectionError,
    Timeout,
    AdapterError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleStatements => "MULTIPLE_STATEMENTS",
            Self::ForbiddenVerb => "FORBIDDEN_VERB",
            Self::MysqlDangerousKeyword => "MYSQL_DANGEROUS_KEYWORD",
            Self::PostgresqlDangerousKeyword => "POSTGRESQL_DANGEROUS_KEYWORD",
            Self::SqliteDangerousKeyword => "SQLITE_DANGEROUS_KEYWORD",
            Self::CommentBypassAttempt => "COMMENT_BYPASS_ATTEMPT",
            Self::IdentifierNotWhitelisted => "IDENTIFIER_NOT_WHITELISTED",
            Self::DangerousIdentifierPattern => "DANGEROUS_IDENTIFIER_PATTERN",
            Self::ReadOnlyViolation => "READ_ONLY_VIOLATION",
            Self::EmptyQuery => "EMPTY_QUERY",
            Self::UnterminatedLiteral => "UNTERMINATED_LITERAL",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::AdapterError => "ADAPTER_ERROR",
        }
    }

    /// True for codes produced before any database round-trip.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Self::ConnectionError | Self::Timeout | Self::AdapterError
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validation rejection: reason code, human message, and where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub code: ReasonCode,
    pub message: String,
    /// The offending token as it appeared in the input, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Byte offset into the original input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl Rejection {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            token: None,
            offset: None,
        }
    }

    pub fn at(mut self, token: impl Into<String>, offset: usize) -> Self {
        self.token = Some(token.into());
        self.offset = Some(offset);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Query rejected ({0})")]
    Rejected(Rejection),

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {}ms", .limit.as_millis())]
    Timeout { operation: String, limit: Duration },

    #[error("Database error: {message}")]
    Adapter {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound { connection_id: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Create an adapter error from a dialect-reported failure.
    pub fn adapter(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Adapter {
            message: message.into(),
            sql_state,
        }
    }

    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: connection_id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map this error onto the reason-code taxonomy.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Rejected(rejection) => rejection.code,
            Self::Connection { .. } | Self::ConnectionNotFound { .. } => {
                ReasonCode::ConnectionError
            }
            Self::Timeout { .. } => ReasonCode::Timeout,
            Self::Adapter { .. } | Self::Internal { .. } => ReasonCode::AdapterError,
        }
    }

    /// The rejection carried by this error, if it is a validation failure.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Timeout { .. } => {
                Some("Narrow the query or raise timeout_secs; timed-out statements are not retried")
            }
            Self::ConnectionNotFound { .. } => {
                Some("Call list_connections to get the configured connection IDs")
            }
            Self::Rejected(rejection) => match rejection.code {
                ReasonCode::IdentifierNotWhitelisted => {
                    Some("Call get_schema to list the tables and columns that exist")
                }
                ReasonCode::ReadOnlyViolation => {
                    Some("Only SELECT and EXPLAIN statements are accepted")
                }
                ReasonCode::MultipleStatements => Some("Send one statement per call"),
                _ => None,
            },
            _ => None,
        }
    }

    /// Structured `{reason_code, message}` payload returned upstream.
    pub fn payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "reason_code": self.reason_code(),
            "message": self.to_string(),
        });
        if let Some(rejection) = self.rejection() {
            payload["token"] = serde_json::json!(rejection.token);
            payload["offset"] = serde_json::json!(rejection.offset);
        }
        if let Self::Adapter {
            sql_state: Some(code),
            ..
        } = self
        {
            payload["sql_state"] = serde_json::json!(code);
        }
        if let Some(suggestion) = self.suggestion() {
            payload["suggestion"] = serde_json::json!(suggestion);
        }
        payload
    }
}

impl From<Rejection> for DbError {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected(rejection)
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::adapter(db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Raise acquire_timeout or max_connections in the connection URL",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Restart the server")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "Restart the server",
            ),
            other => DbError::adapter(other.to_string(), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Convert DbError to MCP ErrorData.
/// The `data` object always carries `reason_code` and `message`.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = Some(err.payload());
        match &err {
            DbError::Rejected(_) => rmcp::ErrorData::invalid_params(err.to_string(), data),
            DbError::ConnectionNotFound { .. } => {
                rmcp::ErrorData::resource_not_found(err.to_string(), data)
            }
            DbError::Adapter {
                message,
                sql_state: Some(code),
            } => rmcp::ErrorData::internal_error(
                format!("Database error: {} (SQLSTATE: {})", message, code),
                data,
            ),
            _ => rmcp::ErrorData::internal_error(err.to_string(), data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_code_serializes_screaming_snake() {
        let json = serde_json::to_value(ReasonCode::PostgresqlDangerousKeyword).unwrap();
        assert_eq!(json, "POSTGRESQL_DANGEROUS_KEYWORD");
        assert_eq!(ReasonCode::ForbiddenVerb.to_string(), "FORBIDDEN_VERB");
    }

    #[test]
    fn test_reason_code_partition() {
        assert!(ReasonCode::MultipleStatements.is_validation());
        assert!(ReasonCode::CommentBypassAttempt.is_validation());
        assert!(!ReasonCode::Timeout.is_validation());
        assert!(!ReasonCode::AdapterError.is_validation());
    }

    #[test]
    fn test_error_reason_codes() {
        let rejected: DbError = Rejection::new(ReasonCode::ForbiddenVerb, "DROP").into();
        assert_eq!(rejected.reason_code(), ReasonCode::ForbiddenVerb);
        assert_eq!(
            DbError::connection("refused", "check host").reason_code(),
            ReasonCode::ConnectionError
        );
        assert_eq!(
            DbError::timeout("query", Duration::from_secs(1)).reason_code(),
            ReasonCode::Timeout
        );
        assert_eq!(
            DbError::adapter("syntax error", Some("42601".into())).reason_code(),
            ReasonCode::AdapterError
        );
        assert_eq!(
            DbError::connection_not_found("x").reason_code(),
            ReasonCode::ConnectionError
        );
    }

    #[test]
    fn test_timeout_display_uses_millis() {
        let err = DbError::timeout("query execution", Duration::from_millis(250));
        assert_eq!(err.to_string(), "Timeout: query execution exceeded 250ms");
    }

    #[test]
    fn test_rejection_payload_carries_token_and_offset() {
        let err: DbError = Rejection::new(ReasonCode::ForbiddenVerb, "Forbidden verb DROP")
            .at("DROP", 7)
            .into();
        let payload = err.payload();
        assert_eq!(payload["reason_code"], "FORBIDDEN_VERB");
        assert_eq!(payload["token"], "DROP");
        assert_eq!(payload["offset"], 7);
    }

    #[test]
    fn test_rejection_maps_to_invalid_params() {
        let err: DbError = Rejection::new(ReasonCode::MultipleStatements, "two").into();
        let mcp_err: rmcp::ErrorData = err.into();
        assert_eq!(mcp_err.code.0, -32602);
        let data = mcp_err.data.unwrap();
        assert_eq!(data["reason_code"], "MULTIPLE_STATEMENTS");
        assert_eq!(data["suggestion"], "Send one statement per call");
    }

    #[test]
    fn test_connection_not_found_maps_to_resource_not_found() {
        let mcp_err: rmcp::ErrorData = DbError::connection_not_found("conn1").into();
        assert_eq!(mcp_err.code.0, -32002);
    }

    #[test]
    fn test_execution_errors_map_to_internal_error() {
        let mcp_err: rmcp::ErrorData =
            DbError::timeout("query", Duration::from_secs(30)).into();
        assert_eq!(mcp_err.code.0, -32603);
        assert_eq!(mcp_err.data.unwrap()["reason_code"], "TIMEOUT");

        let mcp_err: rmcp::ErrorData = DbError::connection("failed", "try again").into();
        assert_eq!(mcp_err.code.0, -32603);
        assert_eq!(mcp_err.data.unwrap()["suggestion"], "try again");
    }

    #[test]
    fn test_adapter_error_includes_sql_state() {
        let err = DbError::adapter("relation does not exist", Some("42P01".to_string()));
        let mcp_err: rmcp::ErrorData = err.into();
        assert!(mcp_err.message.contains("42P01"));
        assert_eq!(mcp_err.data.unwrap()["sql_state"], "42P01");
    }
}
