//! Command shape classification.
//!
//! Two shapes are understood:
//!
//! | Shape | Example |
//! |-------|---------|
//! | database-level | `db.createCollection("users")` |
//! | collection-level | `db.users.find({"age": {"$gt": 30}})` |
//!
//! The database-level pattern is tried first. Anything else is rejected;
//! there is no grammar behind this, only two anchored patterns.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::TranslateError;

static DB_LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^db\.(\w+)\((.*)\)$").expect("static db pattern"));

static COLLECTION_LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^db\.(\w+)\.(\w+)\((.*)\)$").expect("static collection pattern")
});

/// A command whose shape has been recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchedCommand {
    DbLevel {
        operation: String,
        raw_args: String,
    },
    CollectionLevel {
        collection: String,
        operation: String,
        raw_args: String,
    },
}

impl MatchedCommand {
    pub fn operation(&self) -> &str {
        match self {
            MatchedCommand::DbLevel { operation, .. }
            | MatchedCommand::CollectionLevel { operation, .. } => operation,
        }
    }

    pub fn collection(&self) -> Option<&str> {
        match self {
            MatchedCommand::DbLevel { .. } => None,
            MatchedCommand::CollectionLevel { collection, .. } => Some(collection),
        }
    }

    pub fn raw_args(&self) -> &str {
        match self {
            MatchedCommand::DbLevel { raw_args, .. }
            | MatchedCommand::CollectionLevel { raw_args, .. } => raw_args,
        }
    }
}

/// Classify a generated command.
///
/// Surrounding whitespace and one trailing `;` are ignored. On failure the
/// error carries the command text exactly as received.
pub fn match_command(command: &str) -> Result<MatchedCommand, TranslateError> {
    let text = command.trim();
    let text = text.strip_suffix(';').unwrap_or(text).trim_end();

    if let Some(caps) = DB_LEVEL_RE.captures(text) {
        return Ok(MatchedCommand::DbLevel {
            operation: caps[1].to_string(),
            raw_args: caps[2].to_string(),
        });
    }

    if let Some(caps) = COLLECTION_LEVEL_RE.captures(text) {
        return Ok(MatchedCommand::CollectionLevel {
            collection: caps[1].to_string(),
            operation: caps[2].to_string(),
            raw_args: caps[3].to_string(),
        });
    }

    Err(TranslateError::UnparseableCommand {
        command: command.to_string(),
    })
}
