//! Splits a SQL script into individual statements.
//!
//! Uses the sqlparser tokenizer so that semicolons inside string literals,
//! quoted identifiers and comments do not end a statement. Statement text is
//! rebuilt from the tokens, which keeps it byte-for-byte close to the input.

use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::db::DatabaseBackend;
use crate::error::{BatchError, Result};

/// Splits `sql` on top-level semicolons.
///
/// Semicolons inside a `BEGIN ... END` body (SQLite `CREATE TRIGGER`,
/// PostgreSQL `BEGIN ATOMIC`) do not end the statement. Statements that
/// contain only whitespace or comments are dropped. An unterminated literal
/// or comment is a configuration error, reported before anything runs.
pub fn split_statements(sql: &str, backend: DatabaseBackend) -> Result<Vec<String>> {
    let dialect: Box<dyn Dialect> = match backend {
        DatabaseBackend::Postgres => Box::new(PostgreSqlDialect {}),
        DatabaseBackend::Sqlite => Box::new(SQLiteDialect {}),
    };

    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .with_unescape(false)
        .tokenize()
        .map_err(|e| BatchError::config(format!("Cannot split SQL script: {e}")))?;

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut body = BodyTracker::default();

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::SemiColon if !body.is_open() => {
                if body.has_content {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                body = BodyTracker::default();
            }
            Token::EOF => {}
            Token::Whitespace(_) => current.push_str(&token.to_string()),
            other => {
                body.observe(other, next_word(&tokens[i + 1..]));
                current.push_str(&other.to_string());
            }
        }
    }

    if body.has_content {
        statements.push(current.trim().to_string());
    }

    Ok(statements)
}

/// Tracks `BEGIN ... END` nesting within one statement.
#[derive(Debug, Default)]
struct BodyTracker {
    has_content: bool,
    starts_with_create: bool,
    is_trigger: bool,
    depth: usize,
}

impl BodyTracker {
    fn is_open(&self) -> bool {
        self.depth > 0
    }

    fn observe(&mut self, token: &Token, next: Option<&str>) {
        let first = !self.has_content;
        self.has_content = true;

        let Some(word) = unquoted_word(token) else {
            return;
        };

        match word.to_ascii_uppercase().as_str() {
            "CREATE" if first => self.starts_with_create = true,
            "TRIGGER" if self.starts_with_create && self.depth == 0 => self.is_trigger = true,
            "BEGIN" => {
                let atomic = next.is_some_and(|w| w.eq_ignore_ascii_case("ATOMIC"));
                if self.depth > 0 || self.is_trigger || atomic {
                    self.depth += 1;
                }
            }
            // CASE ... END nests inside a body.
            "CASE" if self.depth > 0 => self.depth += 1,
            "END" if self.depth > 0 => self.depth -= 1,
            _ => {}
        }
    }
}

fn unquoted_word(token: &Token) -> Option<&str> {
    match token {
        Token::Word(w) if w.quote_style.is_none() => Some(w.value.as_str()),
        _ => None,
    }
}

/// The first unquoted word after any whitespace.
fn next_word(tokens: &[Token]) -> Option<&str> {
    tokens
        .iter()
        .find(|t| !matches!(t, Token::Whitespace(_)))
        .and_then(unquoted_word)
}
