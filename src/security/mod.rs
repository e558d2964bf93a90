//! SQL validation.
//!
//! Everything here runs before a statement reaches a database connection:
//! a dialect-aware scanner, keyword and construct denylists, identifier
//! hygiene, and the [`QueryValidator`] that applies them in order.

pub mod identifier;
pub mod rules;
pub mod tokenizer;
pub mod validator;

pub use identifier::{check_dangerous_pattern, quote_identifier};
pub use rules::VerbClass;
pub use validator::{
    Identifier, QueryValidator, ResolvedIdentifier, ValidationMode, ValidationVerdict,
};
