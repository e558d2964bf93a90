//! The query validator.
//!
//! Checks run in a fixed order and stop at the first rejection:
//!
//! 1. lexical scan (unterminated literals, executable or unterminated comments)
//! 2. empty input
//! 3. statement count (one statement, optional trailing `;`)
//! 4. forbidden verbs
//! 5. dialect-specific dangerous constructs
//! 6. caller-supplied identifiers against the catalog snapshot
//! 7. leading keyword, in strict read-only mode
//!
//! Validation is pure: it reads the SQL text and an immutable catalog snapshot
//! and never touches the database.

use super::identifier::{CaseRule, check_dangerous_pattern};
use super::rules::{self, READ_ONLY_LEADING};
use super::tokenizer::{CodeView, CommentFill, QueryToken, ScanError, TokenKind, tokenize};
use crate::db::catalog::CatalogSnapshot;
use crate::error::{ReasonCode, Rejection};
use crate::models::DatabaseType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How much of SQL the validator admits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Denylists only.
    ReadOnly,
    /// Denylists, and the statement must start with SELECT or EXPLAIN.
    #[default]
    StrictReadOnly,
}

impl std::fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::StrictReadOnly => write!(f, "strict-read-only"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted,
    Rejected(Rejection),
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Accepted => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }

    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Self::Accepted => Ok(()),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}

impl From<Result<(), Rejection>> for ValidationVerdict {
    fn from(result: Result<(), Rejection>) -> Self {
        match result {
            Ok(()) => Self::Accepted,
            Err(rejection) => Self::Rejected(rejection),
        }
    }
}

/// A table or column name passed separately from the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Table(String),
    Column { table: String, column: String },
}

impl Identifier {
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table(name.into())
    }

    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Column {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Catalog spelling of an accepted identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentifier {
    pub table: String,
    pub column: Option<String>,
}

/// Both code views of a lexically valid input.
struct Scanned {
    spaced: CodeView,
    joined: CodeView,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryValidator {
    dialect: DatabaseType,
    case_rule: CaseRule,
}

impl QueryValidator {
    pub fn new(dialect: DatabaseType) -> Self {
        Self {
            dialect,
            case_rule: CaseRule::for_dialect(dialect),
        }
    }

    pub fn dialect(&self) -> DatabaseType {
        self.dialect
    }

    /// Full validation: SQL text plus caller-supplied identifiers.
    pub fn validate(
        &self,
        sql: &str,
        identifiers: &[Identifier],
        catalog: &CatalogSnapshot,
        mode: ValidationMode,
    ) -> ValidationVerdict {
        let result = self.scan_text(sql).and_then(|scanned| {
            for identifier in identifiers {
                self.check_identifier(identifier, catalog)?;
            }
            self.check_mode(&scanned, mode)
        });
        self.verdict(result)
    }

    /// Validate SQL text that references no caller-supplied identifiers.
    pub fn check_sql(&self, sql: &str, mode: ValidationMode) -> ValidationVerdict {
        let result = self
            .scan_text(sql)
            .and_then(|scanned| self.check_mode(&scanned, mode));
        self.verdict(result)
    }

    /// Pattern check, then whitelist lookup. Returns the catalog spelling.
    pub fn check_identifier(
        &self,
        identifier: &Identifier,
        catalog: &CatalogSnapshot,
    ) -> Result<ResolvedIdentifier, Rejection> {
        match identifier {
            Identifier::Table(name) => {
                check_dangerous_pattern(name)?;
                let table = self.resolve_table(name, catalog)?;
                Ok(ResolvedIdentifier {
                    table: table.to_string(),
                    column: None,
                })
            }
            Identifier::Column { table, column } => {
                check_dangerous_pattern(table)?;
                check_dangerous_pattern(column)?;
                let table_name = self.resolve_table(table, catalog)?;
                let resolved = catalog
                    .table(table_name)
                    .and_then(|schema| {
                        schema
                            .columns
                            .iter()
                            .find(|c| self.case_rule.column_matches(column, &c.name))
                    })
                    .ok_or_else(|| {
                        Rejection::new(
                            ReasonCode::IdentifierNotWhitelisted,
                            format!("Column '{}' does not exist in table '{}'", column, table_name),
                        )
                        .with_token(column.as_str())
                    })?;
                Ok(ResolvedIdentifier {
                    table: table_name.to_string(),
                    column: Some(resolved.name.clone()),
                })
            }
        }
    }

    /// Number of non-empty statements, or `None` if the text does not scan.
    pub fn statement_count(&self, sql: &str) -> Option<usize> {
        let segments = tokenize(sql, self.dialect).ok()?;
        let view = CodeView::build(sql, &segments, CommentFill::Space);
        Some(statement_ranges(&view).len())
    }

    /// The single statement's text, without surrounding separators.
    ///
    /// Only meaningful for input the validator accepted.
    pub fn statement_text<'a>(&self, sql: &'a str) -> &'a str {
        let Ok(segments) = tokenize(sql, self.dialect) else {
            return sql.trim();
        };
        let view = CodeView::build(sql, &segments, CommentFill::Space);
        match statement_ranges(&view).first() {
            Some(&(start, end)) => {
                let from = view.original_offset(start);
                let to = if end < view.text().len() {
                    view.original_offset(end)
                } else {
                    sql.len()
                };
                sql[from..to].trim()
            }
            None => sql.trim(),
        }
    }

    fn resolve_table<'c>(
        &self,
        name: &str,
        catalog: &'c CatalogSnapshot,
    ) -> Result<&'c str, Rejection> {
        catalog
            .tables()
            .keys()
            .find(|known| self.case_rule.table_matches(name, known))
            .map(String::as_str)
            .ok_or_else(|| {
                Rejection::new(
                    ReasonCode::IdentifierNotWhitelisted,
                    format!("Table '{}' does not exist", name),
                )
                .with_token(name)
            })
    }

    /// Checks 1 to 5: everything that depends on the text alone.
    fn scan_text(&self, sql: &str) -> Result<Scanned, Rejection> {
        let segments = tokenize(sql, self.dialect).map_err(|err| lexical_rejection(sql, err))?;
        let spaced = CodeView::build(sql, &segments, CommentFill::Space);
        let joined = CodeView::build(sql, &segments, CommentFill::Remove);

        if spaced.is_blank() {
            return Err(Rejection::new(ReasonCode::EmptyQuery, "Query is empty"));
        }

        let statements = statement_ranges(&spaced);
        match statements.as_slice() {
            [] => return Err(Rejection::new(ReasonCode::EmptyQuery, "Query is empty")),
            [_] => {}
            [_, (second, _), ..] => {
                return Err(Rejection::new(
                    ReasonCode::MultipleStatements,
                    format!("Expected one statement, found {}", statements.len()),
                )
                .at(";", spaced.original_offset(second - 1)));
            }
        }

        let spaced_tokens = spaced.tokens();
        let joined_tokens = joined.tokens();

        for tokens in [&spaced_tokens, &joined_tokens] {
            if let Some((token, _)) = rules::find_forbidden_verb(tokens) {
                return Err(Rejection::new(
                    ReasonCode::ForbiddenVerb,
                    format!("Forbidden verb {}", token.text.to_ascii_uppercase()),
                )
                .at(token.text.as_str(), token.offset));
            }
        }

        let (constructs, code) = rules::constructs_for(self.dialect);
        for tokens in [&spaced_tokens, &joined_tokens] {
            if let Some((construct, idx)) = rules::find_construct(constructs, tokens) {
                let token = &tokens[idx];
                return Err(Rejection::new(code, construct.description)
                    .at(token.text.as_str(), token.offset));
            }
        }

        Ok(Scanned { spaced, joined })
    }

    /// Check 7: strict mode admits only SELECT and EXPLAIN.
    fn check_mode(&self, scanned: &Scanned, mode: ValidationMode) -> Result<(), Rejection> {
        if mode != ValidationMode::StrictReadOnly {
            return Ok(());
        }
        let tokens = scanned.spaced.tokens();
        match first_token(&tokens) {
            Some(token)
                if token.kind == TokenKind::Word
                    && READ_ONLY_LEADING.iter().any(|kw| token.is_word(kw))
                    && joined_leading_matches(&scanned.joined, token) =>
            {
                Ok(())
            }
            Some(token) => Err(Rejection::new(
                ReasonCode::ReadOnlyViolation,
                format!(
                    "Statement must start with SELECT or EXPLAIN, found '{}'",
                    token.text
                ),
            )
            .at(token.text.as_str(), token.offset)),
            None => Err(Rejection::new(ReasonCode::EmptyQuery, "Query is empty")),
        }
    }

    fn verdict(&self, result: Result<(), Rejection>) -> ValidationVerdict {
        if let Err(rejection) = &result {
            warn!(
                dialect = %self.dialect,
                reason = %rejection.code,
                token = ?rejection.token,
                offset = ?rejection.offset,
                "Query rejected: {}",
                rejection.message
            );
        }
        result.into()
    }
}

/// Skip a leading separator left over from `; SELECT ...`.
fn first_token(tokens: &[QueryToken]) -> Option<&QueryToken> {
    tokens.iter().find(|t| !t.is_punct(';'))
}

/// `SEL/**/ECT` reads as two words in the spaced view; the joined view must agree.
fn joined_leading_matches(joined: &CodeView, leading: &QueryToken) -> bool {
    let tokens = joined.tokens();
    first_token(&tokens).is_some_and(|t| t.text.eq_ignore_ascii_case(&leading.text))
}

/// View ranges of the non-blank statements between `;` separators.
fn statement_ranges(view: &CodeView) -> Vec<(usize, usize)> {
    let text = view.text();
    let mut ranges = Vec::new();
    let mut start = 0;
    for sep in view.separator_positions().chain(std::iter::once(text.len())) {
        if !text[start..sep].trim().is_empty() {
            ranges.push((start, sep));
        }
        start = sep + 1;
    }
    ranges
}

fn lexical_rejection(sql: &str, err: ScanError) -> Rejection {
    match err {
        ScanError::UnterminatedLiteral { offset } => {
            let token: String = sql[offset..].chars().take(1).collect();
            Rejection::new(
                ReasonCode::UnterminatedLiteral,
                "String literal or quoted identifier is never closed",
            )
            .at(token, offset)
        }
        ScanError::UnterminatedComment { offset } => Rejection::new(
            ReasonCode::CommentBypassAttempt,
            "Block comment is never closed",
        )
        .at("/*", offset),
        ScanError::ExecutableComment { offset } => {
            let token = if sql[offset..].starts_with("/*M!") {
                "/*M!"
            } else {
                "/*!"
            };
            Rejection::new(
                ReasonCode::CommentBypassAttempt,
                "Executable comments are not allowed",
            )
            .at(token, offset)
        }
    }
}
