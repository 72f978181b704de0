//! Escaping for values interpolated into generated query text.
//!
//! Escaping is a two-step pipeline: backslashes first, then single quotes.
//! Reversing the order would double the backslashes introduced while escaping
//! quotes.

use serde_json::Value as JsonValue;
use std::fmt::Display;

/// Escape any displayable scalar for use inside a single-quoted literal.
///
/// ```
/// use query_guard::query::escape_value;
///
/// assert_eq!(escape_value("O'Brien\\"), "O''Brien\\\\");
/// assert_eq!(escape_value(&42), "42");
/// ```
pub fn escape_value<V: Display + ?Sized>(value: &V) -> String {
    escape_text(&value.to_string())
}

/// Null-safe variant: `None` escapes to the empty string.
pub fn escape_optional<V: Display>(value: Option<V>) -> String {
    value.map(|v| escape_value(&v)).unwrap_or_default()
}

/// Escape a JSON scalar. Strings are escaped without their JSON quotes and
/// `null` becomes the empty string.
pub fn escape_json_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(text) => escape_text(text),
        other => escape_text(&other.to_string()),
    }
}

fn escape_text(text: &str) -> String {
    let backslashes_escaped = escape_backslashes(text);
    escape_single_quotes(&backslashes_escaped)
}

fn escape_backslashes(text: &str) -> String {
    text.replace('\\', "\\\\")
}

fn escape_single_quotes(text: &str) -> String {
    text.replace('\'', "''")
}
