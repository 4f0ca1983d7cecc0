//! Argument normalization.
//!
//! Language models rarely emit strict JSON inside shell-style commands: keys
//! come back unquoted (`{name: "John"}`) and strings single-quoted
//! (`{'name': 'John'}`). [`normalize`] accepts strict JSON first and only then
//! falls back to a textual repair pass. The stage that produced the value is
//! recorded in [`DecodePath`] so callers and tests can tell them apart.
//!
//! The repair is heuristic. It can mangle argument text that has single quotes
//! inside double-quoted strings, or colons inside string values
//! (`{url: 'http://x'}`). Such input is reported as malformed rather than
//! guessed at further.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::NormalizeError;

/// An identifier, bare or quoted, directly followed by a colon.
static KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?([A-Za-z_$][\w$.]*)["']?\s*:"#).expect("static key pattern")
});

/// A single-quoted string literal, honoring backslash escapes.
static SINGLE_QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'((?:[^'\\]|\\.)*)'").expect("static quote pattern"));

/// Which decoding stage produced a [`NormalizedArgs`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    /// The text was already strict JSON (or empty).
    Strict,
    /// The text only decoded after quoting keys and rewriting single quotes.
    Repaired,
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedArgs {
    pub value: Value,
    pub path: DecodePath,
}

/// Decode argument text, repairing near-JSON if strict decoding fails.
///
/// Empty (or whitespace-only) input yields an empty document.
pub fn normalize(text: &str) -> Result<NormalizedArgs, NormalizeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(NormalizedArgs {
            value: Value::Object(Default::default()),
            path: DecodePath::Strict,
        });
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(NormalizedArgs {
            value,
            path: DecodePath::Strict,
        });
    }

    let repaired = repair(trimmed);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => Ok(NormalizedArgs {
            value,
            path: DecodePath::Repaired,
        }),
        Err(e) => Err(NormalizeError {
            text: text.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Decode argument text as strict JSON only, with no repair pass.
pub fn decode_strict(text: &str) -> Result<Value, NormalizeError> {
    serde_json::from_str::<Value>(text.trim()).map_err(|e| NormalizeError {
        text: text.to_string(),
        reason: e.to_string(),
    })
}

/// Apply the two textual repairs: quote keys, then convert single-quoted
/// literals to double-quoted ones.
fn repair(text: &str) -> String {
    let keys_quoted = KEY_RE.replace_all(text, r#""${1}":"#);
    SINGLE_QUOTED_RE
        .replace_all(&keys_quoted, |caps: &Captures| {
            let inner = caps[1].replace("\\'", "'").replace('"', "\\\"");
            format!("\"{}\"", inner)
        })
        .into_owned()
}

/// Split an argument list on top-level commas.
///
/// A comma separates arguments only when it is outside every `{`…`}` span
/// and outside string literals. Segments are trimmed; empty segments (from
/// empty input or a trailing comma) are dropped.
pub fn split_top_level(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth: usize = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                segments.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&text[start..]);

    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
