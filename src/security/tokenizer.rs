//! Comment- and literal-aware SQL scanner.
//!
//! [`tokenize`] walks the input once with an explicit state machine and splits
//! it into [`Segment`]s: code, string literals, quoted identifiers and
//! comments. Quoting and comment rules follow the dialect:
//!
//! | Dialect    | Strings                         | Quoted identifiers  | Comments                          |
//! |------------|---------------------------------|---------------------|-----------------------------------|
//! | MySQL      | `'..'`, `".."` (backslash, `''`) | `` `..` ``          | `#`, `-- ` (dash dash space), `/* */` |
//! | PostgreSQL | `'..'`, `E'..'`, `$tag$..$tag$`  | `".."`              | `--`, nested `/* */`              |
//! | SQLite     | `'..'`                           | `".."`, `` `..` ``, `[..]` | `--`, `/* */`              |
//!
//! [`CodeView`] then derives the text keyword matching runs on, with every
//! literal blanked out and comments either removed or replaced by a space.
//! Each byte of a view maps back to its offset in the original input.

use crate::models::DatabaseType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    StringLiteral,
    QuotedIdentifier,
    LineComment,
    BlockComment,
}

impl SegmentKind {
    pub fn is_comment(&self) -> bool {
        matches!(self, Self::LineComment | Self::BlockComment)
    }
}

/// A classified byte range `[start, end)` of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.start..self.end]
    }
}

/// Lexical problems that make the statement structure untrustworthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// A string literal, quoted identifier or dollar-quoted body never closes.
    UnterminatedLiteral { offset: usize },
    /// A block comment never closes and would swallow the rest of the input.
    UnterminatedComment { offset: usize },
    /// MySQL/MariaDB `/*! ... */` comments are executed by the server.
    ExecutableComment { offset: usize },
}

#[derive(Debug, Clone, Copy)]
enum State {
    Code,
    Quoted {
        kind: SegmentKind,
        close: u8,
        backslash_escapes: bool,
        doubled_escapes: bool,
    },
    LineComment,
    BlockComment {
        depth: u32,
    },
    DollarQuoted {
        tag_start: usize,
        tag_len: usize,
    },
}

/// Split `sql` into classified segments following the dialect's lexical rules.
pub fn tokenize(sql: &str, dialect: DatabaseType) -> Result<Vec<Segment>, ScanError> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut segments = Vec::new();
    let mut state = State::Code;
    let mut seg_start = 0;
    let mut i = 0;

    // Every delimiter is ASCII, so byte positions always fall on char boundaries.
    while i < len {
        match state {
            State::Code => match open_at(bytes, i, dialect)? {
                Some((next, width)) => {
                    push(&mut segments, SegmentKind::Code, seg_start, i);
                    seg_start = i;
                    state = next;
                    i += width;
                }
                None => i += 1,
            },
            State::Quoted {
                kind,
                close,
                backslash_escapes,
                doubled_escapes,
            } => {
                let b = bytes[i];
                if backslash_escapes && b == b'\\' {
                    i = (i + 2).min(len);
                } else if b == close {
                    if doubled_escapes && bytes.get(i + 1) == Some(&close) {
                        i += 2;
                    } else {
                        i += 1;
                        push(&mut segments, kind, seg_start, i);
                        seg_start = i;
                        state = State::Code;
                    }
                } else {
                    i += 1;
                }
            }
            State::LineComment => {
                // The newline stays in code so it still separates tokens.
                if bytes[i] == b'\n' {
                    push(&mut segments, SegmentKind::LineComment, seg_start, i);
                    seg_start = i;
                    state = State::Code;
                } else {
                    i += 1;
                }
            }
            State::BlockComment { depth } => {
                if bytes[i..].starts_with(b"*/") {
                    i += 2;
                    if depth == 1 {
                        push(&mut segments, SegmentKind::BlockComment, seg_start, i);
                        seg_start = i;
                        state = State::Code;
                    } else {
                        state = State::BlockComment { depth: depth - 1 };
                    }
                } else if dialect == DatabaseType::PostgreSQL && bytes[i..].starts_with(b"/*") {
                    i += 2;
                    state = State::BlockComment { depth: depth + 1 };
                } else {
                    i += 1;
                }
            }
            State::DollarQuoted { tag_start, tag_len } => {
                let tag = &bytes[tag_start..tag_start + tag_len];
                if bytes[i..].starts_with(tag) {
                    i += tag_len;
                    push(&mut segments, SegmentKind::StringLiteral, seg_start, i);
                    seg_start = i;
                    state = State::Code;
                } else {
                    i += 1;
                }
            }
        }
    }

    match state {
        State::Code => push(&mut segments, SegmentKind::Code, seg_start, len),
        State::LineComment => push(&mut segments, SegmentKind::LineComment, seg_start, len),
        State::Quoted { .. } | State::DollarQuoted { .. } => {
            return Err(ScanError::UnterminatedLiteral { offset: seg_start });
        }
        State::BlockComment { .. } => {
            return Err(ScanError::UnterminatedComment { offset: seg_start });
        }
    }

    Ok(segments)
}

fn push(segments: &mut Vec<Segment>, kind: SegmentKind, start: usize, end: usize) {
    if end > start {
        segments.push(Segment { kind, start, end });
    }
}

/// Transition out of `Code` at byte `i`, returning the next state and how
/// many bytes the opening delimiter occupies.
fn open_at(
    bytes: &[u8],
    i: usize,
    dialect: DatabaseType,
) -> Result<Option<(State, usize)>, ScanError> {
    let next = bytes.get(i + 1).copied();
    let opened = match (bytes[i], dialect) {
        (b'\'', _) => Some((string_state(bytes, i, dialect), 1)),
        (b'"', DatabaseType::MySQL) => Some((quoted(SegmentKind::StringLiteral, b'"', true), 1)),
        (b'"', _) => Some((quoted(SegmentKind::QuotedIdentifier, b'"', false), 1)),
        (b'`', DatabaseType::MySQL | DatabaseType::SQLite) => {
            Some((quoted(SegmentKind::QuotedIdentifier, b'`', false), 1))
        }
        (b'[', DatabaseType::SQLite) => Some((
            State::Quoted {
                kind: SegmentKind::QuotedIdentifier,
                close: b']',
                backslash_escapes: false,
                doubled_escapes: false,
            },
            1,
        )),
        (b'#', DatabaseType::MySQL) => Some((State::LineComment, 1)),
        (b'-', _) if next == Some(b'-') => {
            // MySQL only treats `--` as a comment when followed by whitespace,
            // a control character or end of input.
            let is_comment = dialect != DatabaseType::MySQL
                || bytes
                    .get(i + 2)
                    .is_none_or(|c| c.is_ascii_whitespace() || c.is_ascii_control());
            is_comment.then_some((State::LineComment, 2))
        }
        (b'/', _) if next == Some(b'*') => {
            if dialect == DatabaseType::MySQL {
                let rest = &bytes[i + 2..];
                if rest.starts_with(b"!") || rest.starts_with(b"M!") {
                    return Err(ScanError::ExecutableComment { offset: i });
                }
            }
            Some((State::BlockComment { depth: 1 }, 2))
        }
        (b'$', DatabaseType::PostgreSQL) => {
            dollar_tag_len(bytes, i).map(|tag_len| (State::DollarQuoted { tag_start: i, tag_len }, tag_len))
        }
        _ => None,
    };
    Ok(opened)
}

fn quoted(kind: SegmentKind, close: u8, backslash_escapes: bool) -> State {
    State::Quoted {
        kind,
        close,
        backslash_escapes,
        doubled_escapes: true,
    }
}

fn string_state(bytes: &[u8], i: usize, dialect: DatabaseType) -> State {
    let backslash_escapes = match dialect {
        DatabaseType::MySQL => true,
        // E'...' escape strings; the prefix must not be the tail of a longer word.
        DatabaseType::PostgreSQL => {
            i >= 1
                && matches!(bytes[i - 1], b'E' | b'e')
                && (i < 2 || !is_word_byte(bytes[i - 2]))
        }
        DatabaseType::SQLite => false,
    };
    quoted(SegmentKind::StringLiteral, b'\'', backslash_escapes)
}

/// Length of a `$tag$` opener at `i`, if one starts there.
fn dollar_tag_len(bytes: &[u8], i: usize) -> Option<usize> {
    // `a$b$` is an identifier containing dollars, not a quote opener.
    if i > 0 && is_word_byte(bytes[i - 1]) {
        return None;
    }
    let mut j = i + 1;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_' || bytes[j] >= 0x80) {
        j += 1;
    }
    // `$1` is a positional parameter.
    if j > i + 1 && bytes[i + 1].is_ascii_digit() {
        return None;
    }
    (bytes.get(j) == Some(&b'$')).then_some(j - i + 1)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// How comments are rendered in a [`CodeView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentFill {
    /// Drop comments entirely so `DR/**/OP` reads as `DROP`.
    Remove,
    /// Replace each comment with one space.
    Space,
}

/// A classified token of the code view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Number,
    Punctuation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryToken {
    pub kind: TokenKind,
    /// Token text as it appears in the view (original case).
    pub text: String,
    /// Byte offset in the original input.
    pub offset: usize,
}

impl QueryToken {
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punctuation && self.text.len() == c.len_utf8() && self.text.starts_with(c)
    }
}

/// Code-only rendering of the input with an offset map back to the original.
#[derive(Debug, Clone)]
pub struct CodeView {
    text: String,
    offsets: Vec<usize>,
}

impl CodeView {
    pub fn build(sql: &str, segments: &[Segment], fill: CommentFill) -> Self {
        let mut text = String::with_capacity(sql.len());
        let mut offsets = Vec::with_capacity(sql.len());
        for segment in segments {
            match segment.kind {
                SegmentKind::Code => {
                    text.push_str(segment.text(sql));
                    offsets.extend(segment.start..segment.end);
                }
                SegmentKind::StringLiteral | SegmentKind::QuotedIdentifier => {
                    text.push(' ');
                    offsets.push(segment.start);
                }
                SegmentKind::LineComment | SegmentKind::BlockComment => {
                    if fill == CommentFill::Space {
                        text.push(' ');
                        offsets.push(segment.start);
                    }
                }
            }
        }
        Self { text, offsets }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Map a byte offset in the view back to the original input.
    pub fn original_offset(&self, view_offset: usize) -> usize {
        self.offsets
            .get(view_offset)
            .or_else(|| self.offsets.last())
            .copied()
            .unwrap_or(0)
    }

    /// Split the view into words, numbers and punctuation, skipping whitespace.
    pub fn tokens(&self) -> Vec<QueryToken> {
        let mut tokens = Vec::new();
        let mut chars = self.text.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            if c.is_whitespace() {
                continue;
            }
            let kind = if is_word_char(c) {
                if c.is_ascii_digit() {
                    TokenKind::Number
                } else {
                    TokenKind::Word
                }
            } else {
                tokens.push(QueryToken {
                    kind: TokenKind::Punctuation,
                    text: c.to_string(),
                    offset: self.original_offset(start),
                });
                continue;
            };
            let mut end = start + c.len_utf8();
            while let Some(&(idx, next)) = chars.peek() {
                if !is_word_char(next) {
                    break;
                }
                end = idx + next.len_utf8();
                chars.next();
            }
            tokens.push(QueryToken {
                kind,
                text: self.text[start..end].to_string(),
                offset: self.original_offset(start),
            });
        }
        tokens
    }

    /// Byte offsets (in the view) of top-level `;` separators.
    pub fn separator_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.text.match_indices(';').map(|(idx, _)| idx)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str, dialect: DatabaseType) -> Vec<(SegmentKind, String)> {
        tokenize(sql, dialect)
            .unwrap()
            .into_iter()
            .map(|s| (s.kind, s.text(sql).to_string()))
            .collect()
    }

    #[test]
    fn test_single_quoted_string() {
        let segs = kinds("SELECT 'DROP' FROM t", DatabaseType::PostgreSQL);
        assert_eq!(segs[1], (SegmentKind::StringLiteral, "'DROP'".to_string()));
        assert_eq!(segs[2], (SegmentKind::Code, " FROM t".to_string()));
    }

    #[test]
    fn test_doubled_quote_escape() {
        let segs = kinds("SELECT 'it''s; DROP' x", DatabaseType::PostgreSQL);
        assert_eq!(
            segs[1],
            (SegmentKind::StringLiteral, "'it''s; DROP'".to_string())
        );
    }

    #[test]
    fn test_backslash_escape_is_dialect_specific() {
        // MySQL: \' escapes the quote, the string continues.
        let segs = kinds(r"SELECT 'a\' b' c", DatabaseType::MySQL);
        assert_eq!(segs[1], (SegmentKind::StringLiteral, r"'a\' b'".to_string()));
        // PostgreSQL standard strings: backslash is literal, the string ends early.
        let segs = kinds(r"SELECT 'a\' b", DatabaseType::PostgreSQL);
        assert_eq!(segs[1], (SegmentKind::StringLiteral, r"'a\'".to_string()));
        // PostgreSQL E'' strings honour backslash escapes.
        let segs = kinds(r"SELECT E'a\' b' c", DatabaseType::PostgreSQL);
        assert_eq!(segs[1], (SegmentKind::StringLiteral, r"'a\' b'".to_string()));
    }

    #[test]
    fn test_double_quotes_by_dialect() {
        let segs = kinds(r#"SELECT "drop" FROM t"#, DatabaseType::MySQL);
        assert_eq!(segs[1].0, SegmentKind::StringLiteral);
        let segs = kinds(r#"SELECT "drop" FROM t"#, DatabaseType::PostgreSQL);
        assert_eq!(segs[1].0, SegmentKind::QuotedIdentifier);
    }

    #[test]
    fn test_backtick_identifier() {
        let segs = kinds("SELECT `we``ird` FROM t", DatabaseType::MySQL);
        assert_eq!(
            segs[1],
            (SegmentKind::QuotedIdentifier, "`we``ird`".to_string())
        );
    }

    #[test]
    fn test_sqlite_bracket_identifier() {
        let segs = kinds("SELECT [order] FROM t", DatabaseType::SQLite);
        assert_eq!(segs[1], (SegmentKind::QuotedIdentifier, "[order]".to_string()));
    }

    #[test]
    fn test_line_comment_keeps_newline_in_code() {
        let segs = kinds("SELECT 1 -- drop\nFROM t", DatabaseType::PostgreSQL);
        assert_eq!(segs[1], (SegmentKind::LineComment, "-- drop".to_string()));
        assert_eq!(segs[2], (SegmentKind::Code, "\nFROM t".to_string()));
    }

    #[test]
    fn test_mysql_dash_dash_requires_space() {
        // `1--1` is arithmetic in MySQL, not a comment.
        let segs = kinds("SELECT 1--1", DatabaseType::MySQL);
        assert_eq!(segs, vec![(SegmentKind::Code, "SELECT 1--1".to_string())]);
        let segs = kinds("SELECT 1--1", DatabaseType::PostgreSQL);
        assert_eq!(segs[1], (SegmentKind::LineComment, "--1".to_string()));
    }

    #[test]
    fn test_mysql_hash_comment() {
        let segs = kinds("SELECT 1 # DROP", DatabaseType::MySQL);
        assert_eq!(segs[1], (SegmentKind::LineComment, "# DROP".to_string()));
        let segs = kinds("SELECT 1 # DROP", DatabaseType::PostgreSQL);
        assert_eq!(segs.len(), 1);
    }

    #[test]
    fn test_nested_block_comment_postgres() {
        let segs = kinds("SELECT /* a /* b */ DROP */ 1", DatabaseType::PostgreSQL);
        assert_eq!(
            segs[1],
            (SegmentKind::BlockComment, "/* a /* b */ DROP */".to_string())
        );
        // MySQL does not nest: the first */ closes the comment.
        let segs = kinds("SELECT /* a /* b */ DROP */ 1", DatabaseType::MySQL);
        assert_eq!(segs[1], (SegmentKind::BlockComment, "/* a /* b */".to_string()));
    }

    #[test]
    fn test_dollar_quoting() {
        let segs = kinds("SELECT $x$ DROP 'a $x$ AS s", DatabaseType::PostgreSQL);
        assert_eq!(
            segs[1],
            (SegmentKind::StringLiteral, "$x$ DROP 'a $x$".to_string())
        );
        let segs = kinds("SELECT $$;$$", DatabaseType::PostgreSQL);
        assert_eq!(segs[1], (SegmentKind::StringLiteral, "$$;$$".to_string()));
    }

    #[test]
    fn test_positional_parameter_is_not_dollar_quote() {
        let segs = kinds("SELECT * FROM t WHERE id = $1 AND b = $2", DatabaseType::PostgreSQL);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].0, SegmentKind::Code);
    }

    #[test]
    fn test_unterminated_literal() {
        assert_eq!(
            tokenize("SELECT 'abc", DatabaseType::PostgreSQL),
            Err(ScanError::UnterminatedLiteral { offset: 7 })
        );
        assert_eq!(
            tokenize("SELECT $a$ abc", DatabaseType::PostgreSQL),
            Err(ScanError::UnterminatedLiteral { offset: 7 })
        );
    }

    #[test]
    fn test_unterminated_comment() {
        assert_eq!(
            tokenize("SELECT 1 /* DROP TABLE t", DatabaseType::MySQL),
            Err(ScanError::UnterminatedComment { offset: 9 })
        );
    }

    #[test]
    fn test_mysql_executable_comment() {
        assert_eq!(
            tokenize("SELECT /*!50000 SLEEP(1) */ 1", DatabaseType::MySQL),
            Err(ScanError::ExecutableComment { offset: 7 })
        );
        assert_eq!(
            tokenize("SELECT /*M! 1 */ 1", DatabaseType::MySQL),
            Err(ScanError::ExecutableComment { offset: 7 })
        );
        assert!(tokenize("SELECT /*! 1 */ 1", DatabaseType::PostgreSQL).is_ok());
    }

    #[test]
    fn test_code_view_removes_comments() {
        let sql = "DR/**/OP TABLE t";
        let segments = tokenize(sql, DatabaseType::MySQL).unwrap();
        let joined = CodeView::build(sql, &segments, CommentFill::Remove);
        assert_eq!(joined.text(), "DROP TABLE t");
        let spaced = CodeView::build(sql, &segments, CommentFill::Space);
        assert_eq!(spaced.text(), "DR OP TABLE t");
    }

    #[test]
    fn test_code_view_offsets_map_to_original() {
        let sql = "SELECT 'x' /* c */ FROM users";
        let segments = tokenize(sql, DatabaseType::PostgreSQL).unwrap();
        let view = CodeView::build(sql, &segments, CommentFill::Remove);
        let tokens = view.tokens();
        let from = tokens.iter().find(|t| t.is_word("from")).unwrap();
        assert_eq!(&sql[from.offset..from.offset + 4], "FROM");
        let users = tokens.iter().find(|t| t.is_word("users")).unwrap();
        assert_eq!(users.offset, sql.find("users").unwrap());
    }

    #[test]
    fn test_tokens_classify() {
        let sql = "SELECT a_1, 42 FROM t WHERE x = @v";
        let segments = tokenize(sql, DatabaseType::MySQL).unwrap();
        let tokens = CodeView::build(sql, &segments, CommentFill::Space).tokens();
        assert_eq!(tokens[0].kind, TokenKind::Word);
        assert_eq!(tokens[1].text, "a_1");
        assert!(tokens[2].is_punct(','));
        assert_eq!(tokens[3].kind, TokenKind::Number);
        assert!(tokens.iter().any(|t| t.is_punct('@')));
    }

    #[test]
    fn test_multibyte_text_survives() {
        let sql = "SELECT 'héllo' AS grüße FROM t";
        let segments = tokenize(sql, DatabaseType::PostgreSQL).unwrap();
        let tokens = CodeView::build(sql, &segments, CommentFill::Space).tokens();
        assert!(tokens.iter().any(|t| t.text == "grüße"));
    }
}
