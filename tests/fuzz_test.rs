//! Randomized validator tests.
//!
//! Generates keyword casings, comment splits and literal wrappings to check
//! that forbidden verbs are caught however they are disguised, and throws
//! random punctuation soup at the scanner to check it never panics and always
//! gives the same answer twice.

use db_guard_mcp::error::ReasonCode;
use db_guard_mcp::models::DatabaseType;
use db_guard_mcp::security::rules::FORBIDDEN_VERBS;
use db_guard_mcp::security::{QueryValidator, ValidationMode};
use rand::Rng;
use rand::seq::SliceRandom;

const DIALECTS: [DatabaseType; 3] = [
    DatabaseType::MySQL,
    DatabaseType::PostgreSQL,
    DatabaseType::SQLite,
];

const ITERATIONS: usize = 200;

fn random_case(word: &str, rng: &mut impl Rng) -> String {
    word.chars()
        .map(|c| {
            if rng.gen_bool(0.5) {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            }
        })
        .collect()
}

/// Insert an empty or non-empty block comment somewhere inside the word.
fn split_with_comment(word: &str, rng: &mut impl Rng) -> String {
    let at = rng.gen_range(1..word.len());
    let comment = ["/**/", "/* x */", "/*\n*/"]
        .choose(rng)
        .copied()
        .unwrap_or("/**/");
    format!("{}{}{}", &word[..at], comment, &word[at..])
}

fn random_whitespace(rng: &mut impl Rng) -> &'static str {
    [" ", "  ", "\t", "\n", " \r\n "]
        .choose(rng)
        .copied()
        .unwrap_or(" ")
}

#[test]
fn test_disguised_verbs_are_always_forbidden() {
    let mut rng = rand::thread_rng();
    for _ in 0..ITERATIONS {
        let (verb, _) = FORBIDDEN_VERBS.choose(&mut rng).unwrap();
        let mut disguised = random_case(verb, &mut rng);
        if rng.gen_bool(0.7) {
            disguised = split_with_comment(&disguised, &mut rng);
        }
        let sql = format!(
            "{}{}{}x",
            random_whitespace(&mut rng),
            disguised,
            random_whitespace(&mut rng)
        );

        for dialect in DIALECTS {
            let verdict = QueryValidator::new(dialect).check_sql(&sql, ValidationMode::ReadOnly);
            assert_eq!(
                verdict.rejection().map(|r| r.code),
                Some(ReasonCode::ForbiddenVerb),
                "{dialect}: {sql:?}"
            );
        }
    }
}

#[test]
fn test_verbs_inside_literals_are_inert() {
    let mut rng = rand::thread_rng();
    for (verb, _) in FORBIDDEN_VERBS {
        let word = random_case(verb, &mut rng);
        let sql = format!("SELECT '{} TABLE users' AS v", word);
        for dialect in DIALECTS {
            for mode in [ValidationMode::ReadOnly, ValidationMode::StrictReadOnly] {
                let verdict = QueryValidator::new(dialect).check_sql(&sql, mode);
                assert!(verdict.is_accepted(), "{dialect} {mode}: {sql:?} -> {verdict:?}");
            }
        }
    }
}

#[test]
fn test_verbs_inside_comments_are_inert() {
    for (verb, _) in FORBIDDEN_VERBS {
        let sql = format!("SELECT 1 /* {} */ FROM t -- {}\n", verb, verb);
        for dialect in DIALECTS {
            let verdict = QueryValidator::new(dialect).check_sql(&sql, ValidationMode::ReadOnly);
            assert!(verdict.is_accepted(), "{dialect}: {sql:?} -> {verdict:?}");
        }
    }
}

#[test]
fn test_random_input_never_panics_and_is_stable() {
    const ALPHABET: &[&str] = &[
        "'", "\"", "`", ";", "-", "--", "/", "*", "/*", "*/", "#", "$", "$$", "[", "]", "\\",
        " ", "\n", "(", ")", "SELECT", "DROP", "a", "1", "E'", "é", "\u{0}",
    ];
    let mut rng = rand::thread_rng();
    for _ in 0..ITERATIONS * 5 {
        let len = rng.gen_range(0..24);
        let sql: String = (0..len)
            .map(|_| *ALPHABET.choose(&mut rng).unwrap())
            .collect();

        for dialect in DIALECTS {
            let validator = QueryValidator::new(dialect);
            for mode in [ValidationMode::ReadOnly, ValidationMode::StrictReadOnly] {
                let first = validator.check_sql(&sql, mode);
                let second = validator.check_sql(&sql, mode);
                assert_eq!(first, second, "{dialect} {mode}: {sql:?}");

                if let Some(rejection) = first.rejection() {
                    if let Some(offset) = rejection.offset {
                        assert!(offset <= sql.len(), "{sql:?} offset {offset}");
                        assert!(sql.is_char_boundary(offset), "{sql:?} offset {offset}");
                    }
                }
            }
            // statement_text must not panic either
            let _ = validator.statement_text(&sql);
        }
    }
}

#[test]
fn test_trailing_separator_variants() {
    let mut rng = rand::thread_rng();
    for _ in 0..ITERATIONS {
        let select = random_case("select", &mut rng);
        let single = format!(
            "{} 1{};{}",
            select,
            random_whitespace(&mut rng),
            random_whitespace(&mut rng)
        );
        let double = format!("{} 1;{}{} 2", select, random_whitespace(&mut rng), select);

        for dialect in DIALECTS {
            let validator = QueryValidator::new(dialect);
            assert!(
                validator
                    .check_sql(&single, ValidationMode::StrictReadOnly)
                    .is_accepted(),
                "{dialect}: {single:?}"
            );
            assert_eq!(
                validator
                    .check_sql(&double, ValidationMode::StrictReadOnly)
                    .rejection()
                    .map(|r| r.code),
                Some(ReasonCode::MultipleStatements),
                "{dialect}: {double:?}"
            );
        }
    }
}
