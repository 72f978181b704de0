//! Lexical normalization for generated queries.
//!
//! Produces the comment-free view that pattern matching runs against, and the
//! comment-free text that becomes the sanitized query. Every stripped comment
//! is replaced by a single space so neighbouring tokens never fuse together
//! (`dr/**/op` normalizes to `dr op`, not `drop`).
//!
//! Two stripping modes exist:
//!
//! - [`CommentMode::Naive`] strips `/* */`, `//` and line-leading `--`
//!   sequences without looking at string literals. A `//` inside a quoted
//!   value such as `'http://host'` is treated as a comment start. This is the
//!   default because existing callers depend on it.
//! - [`CommentMode::LiteralAware`] tracks single- and double-quoted literals
//!   (with backslash escapes) and leaves comment-like text inside them alone.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| compile(r"(?s)/\*.*?\*/"));
// Only `\n` ends a line. Any other whitespace, `\r` included, may lead a
// line-prefix comment, so stripping agrees with `str::trim`.
static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| compile(r"//[^\n]*"));
static LINE_PREFIX_COMMENT: Lazy<Regex> = Lazy::new(|| compile(r"(?m)^[^\S\n]*--[^\n]*"));
static SINGLE_QUOTED_LITERAL: Lazy<Regex> = Lazy::new(|| compile(r"'[^']*'"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("invalid built-in lexer pattern '{pattern}': {e}"))
}

/// How comments are located when stripping them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CommentMode {
    /// Strip comment sequences wherever they occur, including inside literals.
    #[default]
    Naive,
    /// Leave comment-like sequences inside quoted literals untouched.
    LiteralAware,
}

impl fmt::Display for CommentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentMode::Naive => write!(f, "naive"),
            CommentMode::LiteralAware => write!(f, "literal-aware"),
        }
    }
}

/// Remove block, line and line-prefix comments, replacing each with one space.
pub fn strip_comments(text: &str, mode: CommentMode) -> String {
    match mode {
        CommentMode::Naive => strip_comments_naive(text),
        CommentMode::LiteralAware => strip_comments_literal_aware(text),
    }
}

fn strip_comments_naive(text: &str) -> String {
    let text = BLOCK_COMMENT.replace_all(text, " ");
    let text = LINE_COMMENT.replace_all(&text, " ");
    LINE_PREFIX_COMMENT.replace_all(&text, " ").into_owned()
}

fn strip_comments_literal_aware(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut quote: Option<char> = None;
    let mut line_blank = true;

    while let Some((idx, c)) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            line_blank = false;
            if c == '\\' {
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                }
            } else if c == open {
                quote = None;
            } else if c == '\n' {
                line_blank = true;
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                line_blank = false;
                out.push(c);
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                skip_to_line_end(&mut chars);
                out.push(' ');
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                // Unterminated block comments are left as text, matching naive mode.
                let body_start = idx + 2;
                match text[body_start..].find("*/") {
                    Some(end) => {
                        let resume = body_start + end + 2;
                        while chars.next_if(|(i, _)| *i < resume).is_some() {}
                        out.push(' ');
                    }
                    None => {
                        out.push_str(&text[idx..]);
                        break;
                    }
                }
            }
            '-' if line_blank && matches!(chars.peek(), Some((_, '-'))) => {
                skip_to_line_end(&mut chars);
                out.push(' ');
            }
            '\n' => {
                line_blank = true;
                out.push(c);
            }
            c if c.is_whitespace() => out.push(c),
            c => {
                line_blank = false;
                out.push(c);
            }
        }
    }

    out
}

fn skip_to_line_end(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) {
    while chars.next_if(|(_, c)| *c != '\n').is_some() {}
}

/// Remove `'...'` spans (non-nesting) so separators inside values are ignored.
pub fn remove_single_quoted_literals(text: &str) -> String {
    SINGLE_QUOTED_LITERAL.replace_all(text, "").into_owned()
}

/// Query length in UTF-16 code units, the unit length limits are stated in.
///
/// Characters outside the Basic Multilingual Plane count twice.
pub fn query_length(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Comment-free, trimmed text handed to the executor.
pub fn sanitize(raw: &str, mode: CommentMode) -> String {
    strip_comments(raw, mode).trim().to_string()
}
