//! Keyword denylists and dialect-specific dangerous constructs.
//!
//! Matching runs on [`QueryToken`]s of a literal-free code view, so a keyword
//! inside a string or quoted identifier never matches and a keyword split by
//! an inline comment still does.

use super::tokenizer::QueryToken;
use crate::error::ReasonCode;
use crate::models::DatabaseType;

/// Statement class of a forbidden verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbClass {
    /// Changes schema; a rejection hints that the catalog may be stale.
    Ddl,
    Dml,
    Privilege,
    Session,
    /// Opens, ends or branches a transaction.
    Transaction,
    Maintenance,
    /// Moves data between the server and files.
    FileTransfer,
}

/// Verbs that are rejected wherever they appear as a standalone word.
pub const FORBIDDEN_VERBS: &[(&str, VerbClass)] = &[
    ("CREATE", VerbClass::Ddl),
    ("DROP", VerbClass::Ddl),
    ("ALTER", VerbClass::Ddl),
    ("TRUNCATE", VerbClass::Ddl),
    ("RENAME", VerbClass::Ddl),
    ("COMMENT", VerbClass::Ddl),
    ("INSERT", VerbClass::Dml),
    ("UPDATE", VerbClass::Dml),
    ("DELETE", VerbClass::Dml),
    ("REPLACE", VerbClass::Dml),
    ("MERGE", VerbClass::Dml),
    ("INTO", VerbClass::Dml),
    ("COPY", VerbClass::Dml),
    ("LOAD", VerbClass::Dml),
    ("HANDLER", VerbClass::Dml),
    ("GRANT", VerbClass::Privilege),
    ("REVOKE", VerbClass::Privilege),
    ("CALL", VerbClass::Session),
    ("PREPARE", VerbClass::Session),
    ("EXECUTE", VerbClass::Session),
    ("DEALLOCATE", VerbClass::Session),
    ("SET", VerbClass::Session),
    ("SHOW", VerbClass::Session),
    ("USE", VerbClass::Session),
    ("DO", VerbClass::Session),
    ("LOCK", VerbClass::Session),
    ("UNLOCK", VerbClass::Session),
    ("RESET", VerbClass::Session),
    ("DISCARD", VerbClass::Session),
    ("LISTEN", VerbClass::Session),
    ("NOTIFY", VerbClass::Session),
    ("KILL", VerbClass::Session),
    ("BEGIN", VerbClass::Transaction),
    ("START", VerbClass::Transaction),
    ("COMMIT", VerbClass::Transaction),
    ("ROLLBACK", VerbClass::Transaction),
    ("ABORT", VerbClass::Transaction),
    ("SAVEPOINT", VerbClass::Transaction),
    ("RELEASE", VerbClass::Transaction),
    ("XA", VerbClass::Transaction),
    ("VACUUM", VerbClass::Maintenance),
    ("ANALYZE", VerbClass::Maintenance),
    ("FLUSH", VerbClass::Maintenance),
    ("SHUTDOWN", VerbClass::Maintenance),
    ("RESTART", VerbClass::Maintenance),
    ("REPAIR", VerbClass::Maintenance),
    ("OPTIMIZE", VerbClass::Maintenance),
    ("BACKUP", VerbClass::Maintenance),
    ("RESTORE", VerbClass::Maintenance),
    ("REINDEX", VerbClass::Maintenance),
    ("CLUSTER", VerbClass::Maintenance),
    ("REFRESH", VerbClass::Maintenance),
    ("INSTALL", VerbClass::Maintenance),
    ("UNINSTALL", VerbClass::Maintenance),
    ("RELOAD", VerbClass::Maintenance),
    ("CHECK", VerbClass::Maintenance),
    ("CHECKSUM", VerbClass::Maintenance),
    ("IMPORT", VerbClass::FileTransfer),
    ("EXPORT", VerbClass::FileTransfer),
    ("DUMP", VerbClass::FileTransfer),
    ("OUTFILE", VerbClass::FileTransfer),
    ("INFILE", VerbClass::FileTransfer),
];

/// Keywords a table or column name must never contain as a word.
pub const IDENTIFIER_KEYWORDS: &[&str] = &[
    "UNION", "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE",
];

/// Leading keywords accepted in strict read-only mode.
pub const READ_ONLY_LEADING: &[&str] = &["SELECT", "EXPLAIN"];

/// Shape of a dangerous construct in the token stream.
#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    /// Consecutive words, e.g. `INTO OUTFILE`.
    Words(&'static [&'static str]),
    /// A function call: the word followed by `(`.
    Call(&'static str),
    /// A word directly followed by a punctuation character, e.g. `INTO @var`.
    WordThenPunct(&'static str, char),
    /// A word followed later in the statement by any of the given words.
    WordThenLater(&'static str, &'static [&'static str]),
    /// A psql-style backslash meta-command, e.g. `\copy`.
    MetaCommand(&'static str),
    /// A standalone word.
    Word(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct DangerousConstruct {
    pub pattern: Pattern,
    pub description: &'static str,
}

const fn construct(pattern: Pattern, description: &'static str) -> DangerousConstruct {
    DangerousConstruct {
        pattern,
        description,
    }
}

pub const MYSQL_CONSTRUCTS: &[DangerousConstruct] = &[
    construct(Pattern::Words(&["INTO", "OUTFILE"]), "INTO OUTFILE writes to the server filesystem"),
    construct(Pattern::Words(&["INTO", "DUMPFILE"]), "INTO DUMPFILE writes to the server filesystem"),
    construct(Pattern::Call("LOAD_FILE"), "LOAD_FILE() reads from the server filesystem"),
    construct(Pattern::Words(&["LOAD", "DATA"]), "LOAD DATA imports files"),
    construct(Pattern::Words(&["LOCAL", "INFILE"]), "LOCAL INFILE reads client files"),
    construct(Pattern::WordThenPunct("INTO", '@'), "SELECT ... INTO @var assigns session variables"),
    construct(Pattern::Call("SLEEP"), "SLEEP() ties up connections"),
    construct(Pattern::Call("BENCHMARK"), "BENCHMARK() burns server CPU"),
    construct(Pattern::Call("GET_LOCK"), "GET_LOCK() takes a named server lock"),
];

pub const POSTGRES_CONSTRUCTS: &[DangerousConstruct] = &[
    construct(Pattern::WordThenLater("COPY", &["FROM", "TO"]), "COPY moves data to or from files and programs"),
    construct(Pattern::MetaCommand("copy"), "\\copy moves data through the client"),
    construct(Pattern::MetaCommand("lo_import"), "\\lo_import reads client files"),
    construct(Pattern::MetaCommand("lo_export"), "\\lo_export writes client files"),
    construct(Pattern::Call("pg_read_file"), "pg_read_file() reads server files"),
    construct(Pattern::Call("pg_read_binary_file"), "pg_read_binary_file() reads server files"),
    construct(Pattern::Call("pg_ls_dir"), "pg_ls_dir() lists server directories"),
    construct(Pattern::Call("pg_stat_file"), "pg_stat_file() inspects server files"),
    construct(Pattern::Call("lo_import"), "lo_import() reads server files"),
    construct(Pattern::Call("lo_export"), "lo_export() writes server files"),
    construct(Pattern::Call("lo_get"), "lo_get() reads large objects"),
    construct(Pattern::Call("dblink"), "dblink() opens outbound connections"),
    construct(Pattern::Call("dblink_exec"), "dblink_exec() runs remote statements"),
    construct(Pattern::Call("pg_sleep"), "pg_sleep() ties up connections"),
    construct(Pattern::Call("pg_terminate_backend"), "pg_terminate_backend() kills sessions"),
    construct(Pattern::Call("pg_cancel_backend"), "pg_cancel_backend() cancels sessions"),
    construct(Pattern::Call("set_config"), "set_config() changes session settings"),
];

pub const SQLITE_CONSTRUCTS: &[DangerousConstruct] = &[
    construct(Pattern::Word("ATTACH"), "ATTACH opens additional database files"),
    construct(Pattern::Word("DETACH"), "DETACH changes attached databases"),
    construct(Pattern::Word("PRAGMA"), "PRAGMA changes connection settings"),
    construct(Pattern::Call("load_extension"), "load_extension() loads native code"),
    construct(Pattern::Call("readfile"), "readfile() reads local files"),
    construct(Pattern::Call("writefile"), "writefile() writes local files"),
];

/// Dangerous constructs for a dialect, and the reason code they report.
pub fn constructs_for(dialect: DatabaseType) -> (&'static [DangerousConstruct], ReasonCode) {
    match dialect {
        DatabaseType::MySQL => (MYSQL_CONSTRUCTS, ReasonCode::MysqlDangerousKeyword),
        DatabaseType::PostgreSQL => (POSTGRES_CONSTRUCTS, ReasonCode::PostgresqlDangerousKeyword),
        DatabaseType::SQLite => (SQLITE_CONSTRUCTS, ReasonCode::SqliteDangerousKeyword),
    }
}

/// Look up a word in the forbidden verb list (ASCII case-insensitive).
pub fn forbidden_verb(word: &str) -> Option<VerbClass> {
    FORBIDDEN_VERBS
        .iter()
        .find(|(verb, _)| verb.eq_ignore_ascii_case(word))
        .map(|(_, class)| *class)
}

/// First forbidden verb in the token stream.
pub fn find_forbidden_verb(tokens: &[QueryToken]) -> Option<(&QueryToken, VerbClass)> {
    tokens.iter().find_map(|token| {
        if token.kind != super::tokenizer::TokenKind::Word {
            return None;
        }
        forbidden_verb(&token.text).map(|class| (token, class))
    })
}

impl Pattern {
    /// Index of the token where the pattern starts, if it matches at all.
    pub fn find(&self, tokens: &[QueryToken]) -> Option<usize> {
        (0..tokens.len()).find(|&i| self.matches_at(tokens, i))
    }

    fn matches_at(&self, tokens: &[QueryToken], i: usize) -> bool {
        let next = tokens.get(i + 1);
        match *self {
            Pattern::Words(words) => {
                tokens.len() >= i + words.len()
                    && words
                        .iter()
                        .zip(&tokens[i..])
                        .all(|(word, token)| token.is_word(word))
            }
            Pattern::Call(name) => tokens[i].is_word(name) && next.is_some_and(|t| t.is_punct('(')),
            Pattern::WordThenPunct(word, punct) => {
                tokens[i].is_word(word) && next.is_some_and(|t| t.is_punct(punct))
            }
            Pattern::WordThenLater(word, later) => {
                tokens[i].is_word(word)
                    && tokens[i + 1..]
                        .iter()
                        .any(|t| later.iter().any(|w| t.is_word(w)))
            }
            Pattern::MetaCommand(name) => tokens[i].is_punct('\\') && next.is_some_and(|t| t.is_word(name)),
            Pattern::Word(word) => tokens[i].is_word(word),
        }
    }
}

/// First dangerous construct in the token stream: (construct, token index).
pub fn find_construct<'a>(
    constructs: &'a [DangerousConstruct],
    tokens: &[QueryToken],
) -> Option<(&'a DangerousConstruct, usize)> {
    constructs
        .iter()
        .filter_map(|c| c.pattern.find(tokens).map(|idx| (c, idx)))
        .min_by_key(|(_, idx)| *idx)
}
