//! Helpers for the SQL fragments supplied by job definitions.

use crate::bail;
use crate::error::{DumpResult, ErrorKind};
use crate::types::Params;

/// Replaces `:name` placeholders in `fragment` with literals of the matching parameters.
///
/// Quoted strings, quoted identifiers and `::type` casts are copied unchanged. A placeholder
/// without a parameter fails with [`ErrorKind::MissingParameter`].
pub fn bind_named_params(fragment: &str, params: &Params) -> DumpResult<String> {
    let chars: Vec<char> = fragment.chars().collect();
    let mut bound = String::with_capacity(fragment.len());
    let mut index = 0;

    while index < chars.len() {
        let c = chars[index];

        match c {
            '\'' | '"' => {
                let end = closing_quote(&chars, index);
                bound.extend(&chars[index..end]);
                index = end;
            }
            ':' if chars.get(index + 1) == Some(&':') => {
                bound.push_str("::");
                index += 2;
            }
            ':' if chars
                .get(index + 1)
                .is_some_and(|next| next.is_ascii_alphabetic() || *next == '_') =>
            {
                let start = index + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }

                let name: String = chars[start..end].iter().collect();
                let Some(value) = params.get(&name) else {
                    bail!(
                        ErrorKind::MissingParameter,
                        "SQL fragment references an unknown parameter",
                        format!("`:{name}` in `{fragment}`")
                    );
                };

                bound.push_str(&value.to_sql_literal());
                index = end;
            }
            _ => {
                bound.push(c);
                index += 1;
            }
        }
    }

    Ok(bound)
}

/// Returns the index just past the quote closing the one at `start`.
///
/// Doubled quotes are escapes. An unterminated quote runs to the end of the input.
fn closing_quote(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut index = start + 1;

    while index < chars.len() {
        if chars[index] == quote {
            if chars.get(index + 1) == Some(&quote) {
                index += 2;
                continue;
            }
            return index + 1;
        }
        index += 1;
    }

    chars.len()
}

/// Returns `true` if `text` is a plain, unquoted SQL identifier.
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();

    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
