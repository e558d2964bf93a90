//! Identifier hygiene: the dangerous-pattern denylist, per-dialect quoting,
//! and the case rule used for whitelist lookups.

use super::rules::IDENTIFIER_KEYWORDS;
use crate::error::{ReasonCode, Rejection};
use crate::models::DatabaseType;

/// Longest identifier accepted from a caller.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

const FORBIDDEN_SEQUENCES: &[&str] = &["--", "/*", "*/", ".."];
const FORBIDDEN_CHARS: &[char] = &[';', '\'', '"', '`', '\\', '#', '%'];

/// Reject identifier strings that carry SQL syntax.
///
/// Runs on the raw string before any catalog lookup, so a name that happens
/// to exist in the catalog is still rejected if it looks like an injection.
pub fn check_dangerous_pattern(name: &str) -> Result<(), Rejection> {
    let reject = |message: String, token: &str, offset: usize| {
        Err(Rejection::new(ReasonCode::DangerousIdentifierPattern, message).at(token, offset))
    };

    if name.is_empty() {
        return Err(Rejection::new(
            ReasonCode::DangerousIdentifierPattern,
            "Identifier cannot be empty",
        ));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(Rejection::new(
            ReasonCode::DangerousIdentifierPattern,
            format!(
                "Identifier is {} bytes long, maximum is {}",
                name.len(),
                MAX_IDENTIFIER_LENGTH
            ),
        )
        .with_token(name));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return reject("Identifier cannot start with a digit".to_string(), name, 0);
    }
    if let Some((offset, c)) = name
        .char_indices()
        .find(|(_, c)| c.is_control() || c.is_whitespace())
    {
        return reject(
            format!("Identifier contains whitespace or control character {:?}", c),
            &c.to_string(),
            offset,
        );
    }
    if let Some((offset, c)) = name.char_indices().find(|(_, c)| FORBIDDEN_CHARS.contains(c)) {
        return reject(
            format!("Identifier contains forbidden character '{}'", c),
            &c.to_string(),
            offset,
        );
    }
    for sequence in FORBIDDEN_SEQUENCES {
        if let Some(offset) = name.find(sequence) {
            return reject(
                format!("Identifier contains forbidden sequence '{}'", sequence),
                sequence,
                offset,
            );
        }
    }
    for (offset, word) in words(name) {
        if IDENTIFIER_KEYWORDS
            .iter()
            .any(|kw| kw.eq_ignore_ascii_case(word))
        {
            return reject(
                format!("Identifier contains SQL keyword '{}'", word),
                word,
                offset,
            );
        }
    }
    Ok(())
}

/// Maximal runs of word characters with their byte offsets.
fn words(name: &str) -> impl Iterator<Item = (usize, &str)> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    let mut rest = name.char_indices().peekable();
    std::iter::from_fn(move || {
        let (start, _) = rest.find(|&(_, c)| is_word(c))?;
        let mut end = name.len();
        while let Some(&(idx, c)) = rest.peek() {
            if !is_word(c) {
                end = idx;
                break;
            }
            rest.next();
        }
        Some((start, &name[start..end]))
    })
}

/// Quote a catalog-resolved identifier for the dialect.
pub fn quote_identifier(name: &str, dialect: DatabaseType) -> String {
    let quote = match dialect {
        DatabaseType::MySQL => '`',
        DatabaseType::PostgreSQL | DatabaseType::SQLite => '"',
    };
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(quote);
    for c in name.chars() {
        if c == quote {
            quoted.push(quote);
        }
        quoted.push(c);
    }
    quoted.push(quote);
    quoted
}

/// How caller-supplied names are compared against catalog names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseRule {
    pub tables_ignore_case: bool,
    pub columns_ignore_case: bool,
}

impl CaseRule {
    pub fn for_dialect(dialect: DatabaseType) -> Self {
        match dialect {
            // Table names map to files and are case-sensitive on most platforms.
            DatabaseType::MySQL => Self {
                tables_ignore_case: false,
                columns_ignore_case: true,
            },
            // Identifiers are always emitted quoted, so the stored spelling must match.
            DatabaseType::PostgreSQL => Self {
                tables_ignore_case: false,
                columns_ignore_case: false,
            },
            DatabaseType::SQLite => Self {
                tables_ignore_case: true,
                columns_ignore_case: true,
            },
        }
    }

    pub fn table_matches(&self, candidate: &str, catalog_name: &str) -> bool {
        Self::matches(self.tables_ignore_case, candidate, catalog_name)
    }

    pub fn column_matches(&self, candidate: &str, catalog_name: &str) -> bool {
        Self::matches(self.columns_ignore_case, candidate, catalog_name)
    }

    fn matches(ignore_case: bool, candidate: &str, catalog_name: &str) -> bool {
        if ignore_case {
            candidate.eq_ignore_ascii_case(catalog_name)
        } else {
            candidate == catalog_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(name: &str) -> Option<ReasonCode> {
        check_dangerous_pattern(name).err().map(|r| r.code)
    }

    #[test]
    fn test_plain_identifiers_pass() {
        for name in ["users", "user_accounts", "_private", "Orders2024", "t$1", "grüße"] {
            assert!(check_dangerous_pattern(name).is_ok(), "{name} should pass");
        }
    }

    #[test]
    fn test_injection_shapes_rejected() {
        for name in [
            "users; DROP TABLE users",
            "users'--",
            "a\"b",
            "a`b",
            "a\\b",
            "users--",
            "users#",
            "users/*x*/",
            "a..b",
            "a%",
            "a b",
            "a\tb",
            "a\0b",
            "1users",
            "",
        ] {
            assert_eq!(
                code(name),
                Some(ReasonCode::DangerousIdentifierPattern),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_keyword_words_rejected() {
        assert!(code("select").is_some());
        assert!(code("users.union").is_some());
        // Keywords embedded inside a longer word are fine.
        assert!(code("selected_items").is_none());
        assert!(code("created_at").is_none());
    }

    #[test]
    fn test_length_limit() {
        assert!(check_dangerous_pattern(&"a".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
        assert!(check_dangerous_pattern(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_rejection_points_at_token() {
        let rejection = check_dangerous_pattern("users; DROP TABLE users").unwrap_err();
        assert_eq!(rejection.token.as_deref(), Some(" "));
        assert_eq!(rejection.offset, Some(6));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users", DatabaseType::MySQL), "`users`");
        assert_eq!(quote_identifier("we`ird", DatabaseType::MySQL), "`we``ird`");
        assert_eq!(quote_identifier("Users", DatabaseType::PostgreSQL), "\"Users\"");
        assert_eq!(quote_identifier("a\"b", DatabaseType::SQLite), "\"a\"\"b\"");
    }

    #[test]
    fn test_case_rules() {
        let mysql = CaseRule::for_dialect(DatabaseType::MySQL);
        assert!(!mysql.table_matches("Users", "users"));
        assert!(mysql.column_matches("NAME", "name"));

        let pg = CaseRule::for_dialect(DatabaseType::PostgreSQL);
        assert!(!pg.table_matches("Users", "users"));
        assert!(!pg.column_matches("Name", "name"));
        assert!(pg.column_matches("name", "name"));

        let sqlite = CaseRule::for_dialect(DatabaseType::SQLite);
        assert!(sqlite.table_matches("USERS", "users"));
        assert!(sqlite.column_matches("Id", "id"));
    }
}
