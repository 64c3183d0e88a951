//! Glob-to-anchored-regex translation for `keys(pattern)` / `deletePattern(pattern)`.
//!
//! Only `*` and `?` are wildcard metacharacters; every other regex
//! metacharacter in the pattern is escaped literally, and the resulting
//! expression is anchored with `^…$`.

use regex::Regex;

use crate::error::{StorageError, StorageResult};

pub fn glob_to_regex(pattern: &str) -> StorageResult<Regex> {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => {
                if regex_syntax::is_meta_character(c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| StorageError::InvalidPattern(e.to_string()))
}

mod regex_syntax {
    /// Mirrors `regex::escape`'s notion of a metacharacter, without pulling
    /// in the escape of `*`/`?` that we handle ourselves.
    pub fn is_meta_character(c: char) -> bool {
        matches!(
            c,
            '\\' | '.' | '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        )
    }
}
