//! Error taxonomy for the translation pipeline.
//!
//! Two kinds of failure exist:
//!
//! - **Transport-level** ([`TranslateError::MissingQuery`],
//!   [`TranslateError::TranslationFailed`]) abort the request and map to a
//!   non-2xx HTTP status.
//! - **Data-level** (everything else) are rendered into the response's
//!   `db_result` field via [`TranslateError::to_result_value`] and the request
//!   still succeeds.

use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Which dispatch table an operation name was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationScope {
    Database,
    Collection,
}

impl fmt::Display for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationScope::Database => f.write_str("database"),
            OperationScope::Collection => f.write_str("collection"),
        }
    }
}

/// Argument text that could not be decoded, even after the repair pass.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("could not decode arguments `{text}`: {reason}")]
pub struct NormalizeError {
    /// The argument text exactly as received.
    pub text: String,
    /// Decoder message from the last attempt.
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("query must not be empty")]
    MissingQuery,

    #[error("translation failed: {0}")]
    TranslationFailed(String),

    #[error("Unsupported or unparseable command: {command}")]
    UnparseableCommand { command: String },

    #[error("{operation}: {source}")]
    MalformedArguments {
        operation: String,
        #[source]
        source: NormalizeError,
    },

    #[error("{operation}: {message}")]
    InvalidArguments { operation: String, message: String },

    #[error("Unsupported MongoDB {scope} operation: {name}")]
    UnsupportedOperation { scope: OperationScope, name: String },

    #[error("{operation}: {message}")]
    StoreExecutionFailed { operation: String, message: String },
}

impl TranslateError {
    pub fn invalid(operation: &str, message: impl Into<String>) -> Self {
        TranslateError::InvalidArguments {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(operation: &str, source: NormalizeError) -> Self {
        TranslateError::MalformedArguments {
            operation: operation.to_string(),
            source,
        }
    }

    /// Wraps a store failure, keeping the full context chain in the message.
    pub fn store(operation: &str, err: anyhow::Error) -> Self {
        TranslateError::StoreExecutionFailed {
            operation: operation.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// True for failures that abort the request instead of becoming data.
    pub fn is_transport_level(&self) -> bool {
        matches!(
            self,
            TranslateError::MissingQuery | TranslateError::TranslationFailed(_)
        )
    }

    /// Machine-readable code used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            TranslateError::MissingQuery => "missing_query",
            TranslateError::TranslationFailed(_) => "translation_failed",
            TranslateError::UnparseableCommand { .. } => "unparseable_command",
            TranslateError::MalformedArguments { .. } => "malformed_arguments",
            TranslateError::InvalidArguments { .. } => "invalid_arguments",
            TranslateError::UnsupportedOperation { .. } => "unsupported_operation",
            TranslateError::StoreExecutionFailed { .. } => "store_execution_failed",
        }
    }

    /// Renders the error as an embedded result object.
    ///
    /// Unparseable commands also carry the offending text under `command`.
    pub fn to_result_value(&self) -> Value {
        match self {
            TranslateError::UnparseableCommand { command } => json!({
                "error": self.to_string(),
                "command": command,
            }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_collection_message() {
        let err = TranslateError::UnsupportedOperation {
            scope: OperationScope::Collection,
            name: "unknownOp".to_string(),
        };
        assert_eq!(
            err.to_result_value(),
            json!({ "error": "Unsupported MongoDB collection operation: unknownOp" })
        );
    }

    #[test]
    fn test_unparseable_carries_command() {
        let err = TranslateError::UnparseableCommand {
            command: "show me everything".to_string(),
        };
        let value = err.to_result_value();
        assert_eq!(value["command"], "show me everything");
        assert!(value["error"].as_str().unwrap().contains("show me everything"));
    }

    #[test]
    fn test_malformed_includes_operation_and_text() {
        let err = TranslateError::malformed(
            "find",
            NormalizeError {
                text: "{name: }".to_string(),
                reason: "expected value".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("find: "));
        assert!(msg.contains("{name: }"));
    }

    #[test]
    fn test_transport_level_split() {
        assert!(TranslateError::MissingQuery.is_transport_level());
        assert!(TranslateError::TranslationFailed("down".into()).is_transport_level());
        assert!(!TranslateError::invalid("updateOne", "needs two").is_transport_level());
        assert!(!TranslateError::store("find", anyhow::anyhow!("boom")).is_transport_level());
    }
}
