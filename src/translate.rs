//! Request-level translation pipeline.
//!
//! ```text
//! query ──▶ TextGenerator ──▶ strip fences ──▶ match_command ──▶ Dispatcher ──▶ ResponseEnvelope
//! ```
//!
//! Only two failures abort a request: an empty query and a generator error.
//! A command that cannot be matched, or that fails during dispatch, is
//! reported inside `db_result` and the request still succeeds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

use crate::dispatch::Dispatcher;
use crate::error::TranslateError;
use crate::generator::TextGenerator;
use crate::matcher::match_command;
use crate::store::DocumentStore;

/// System instructions sent with every query.
///
/// The examples cover exactly the command shapes and operations the matcher
/// and dispatcher accept.
pub const INSTRUCTIONS: &str = r#"You translate natural-language requests into a single MongoDB shell command.

Rules:
- Reply with exactly one command and nothing else: no explanation, no markdown.
- Use one of these shapes:
    db.<operation>(<arguments>)
    db.<collection>.<operation>(<arguments>)
- Database operations: createCollection, dropDatabase, listCollections, runCommand.
- Collection operations: find, insertOne, updateOne, updateMany, deleteOne,
  deleteMany, createIndex, countDocuments, aggregate.
- Write arguments as JSON with double-quoted keys and strings.
- Do not chain calls such as .limit() or .sort().

Examples:
Request: show all users
Command: db.users.find({})

Request: find users older than 30
Command: db.users.find({"age": {"$gt": 30}})

Request: add a user named Alice who is 25
Command: db.users.insertOne({"name": "Alice", "age": 25})

Request: set the status of order 42 to shipped
Command: db.orders.updateOne({"orderId": 42}, {"$set": {"status": "shipped"}})

Request: mark every pending order as cancelled
Command: db.orders.updateMany({"status": "pending"}, {"$set": {"status": "cancelled"}})

Request: delete users named John
Command: db.users.deleteOne({"name": "John"})

Request: remove all inactive users
Command: db.users.deleteMany({"active": false})

Request: how many products are there
Command: db.products.countDocuments({})

Request: index users by email
Command: db.users.createIndex({"email": 1})

Request: total sales per region
Command: db.sales.aggregate([{"$group": {"_id": "$region", "total": {"$sum": "$amount"}}}])

Request: create a collection called logs
Command: db.createCollection("logs")

Request: list all collections
Command: db.listCollections({})

Request: check that the server is up
Command: db.runCommand({"ping": 1})

Request: delete the whole database
Command: db.dropDatabase()
"#;

/// The response for one request. Built once and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub user_query: String,
    pub generated_command: String,
    pub db_result: Value,
}

/// Remove surrounding whitespace and markdown code fences from generated text.
pub fn strip_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // The opening fence may carry a language tag on its own line.
        s = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => strip_inline_tag(rest),
        };
        s = s.trim_end();
        s = s.strip_suffix("```").unwrap_or(s);
    }
    s.trim().trim_matches('`').trim()
}

/// Drop a language tag from a single-line fence such as ```` ```js db.x.find({})``` ````.
///
/// The tag is only removed when a `db.` command follows it, so free text
/// inside a fence is left as written.
fn strip_inline_tag(rest: &str) -> &str {
    match rest.split_once(char::is_whitespace) {
        Some((tag, command))
            if !tag.is_empty()
                && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                && command.trim_start().starts_with("db.") =>
        {
            command.trim_start()
        }
        _ => rest,
    }
}

/// Runs the full pipeline for each request.
///
/// Holds the generator and the dispatcher (and through it the shared store
/// handle). Cheap to share behind an `Arc`.
pub struct Translator {
    generator: Arc<dyn TextGenerator>,
    dispatcher: Dispatcher,
}

impl Translator {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            generator,
            dispatcher: Dispatcher::new(store),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Translate and execute one natural-language query.
    ///
    /// # Errors
    ///
    /// [`TranslateError::MissingQuery`] for an empty query and
    /// [`TranslateError::TranslationFailed`] when the generator fails. Every
    /// other failure is embedded in the envelope's `db_result`.
    pub async fn translate(&self, query: &str) -> Result<ResponseEnvelope, TranslateError> {
        let span = tracing::info_span!("translate", request_id = %uuid::Uuid::new_v4());
        self.translate_inner(query).instrument(span).await
    }

    async fn translate_inner(&self, query: &str) -> Result<ResponseEnvelope, TranslateError> {
        if query.trim().is_empty() {
            return Err(TranslateError::MissingQuery);
        }
        tracing::info!(query, "received");

        let generated = self
            .generator
            .generate(INSTRUCTIONS, query)
            .await
            .map_err(|e| {
                tracing::error!(model = self.generator.model_name(), "generator failed: {:#}", e);
                TranslateError::TranslationFailed(format!("{:#}", e))
            })?;
        let command = strip_fences(&generated).to_string();
        tracing::debug!(command = %command, "generated");

        let db_result = self.run_command(&command).await;

        Ok(ResponseEnvelope {
            user_query: query.to_string(),
            generated_command: command,
            db_result,
        })
    }

    /// Match and dispatch a literal command, skipping the generator.
    pub async fn run_command(&self, command: &str) -> Value {
        match match_command(command) {
            Ok(matched) => self.dispatcher.dispatch(&matched).await,
            Err(e) => {
                tracing::warn!(code = e.code(), "{}", e);
                e.to_result_value()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::StaticGenerator;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn translator(reply: &str) -> Translator {
        Translator::new(
            Arc::new(StaticGenerator::new(reply)),
            Arc::new(MemoryStore::new("app")),
        )
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("  db.users.find({})\n"), "db.users.find({})");
        assert_eq!(
            strip_fences("```javascript\ndb.users.find({})\n```"),
            "db.users.find({})"
        );
        assert_eq!(strip_fences("```\ndb.users.find({})\n```\n"), "db.users.find({})");
        assert_eq!(strip_fences("`db.users.find({})`"), "db.users.find({})");
    }

    #[test]
    fn test_strip_single_line_fence_with_tag() {
        assert_eq!(strip_fences("```js db.users.find({})```"), "db.users.find({})");
        assert_eq!(
            strip_fences("```javascript  db.users.countDocuments({})```"),
            "db.users.countDocuments({})"
        );
        assert_eq!(strip_fences("```db.users.find({})```"), "db.users.find({})");
        // Free text keeps its first word.
        assert_eq!(strip_fences("```Sorry, no idea```"), "Sorry, no idea");
    }

    #[tokio::test]
    async fn test_single_line_tagged_fence_executes() {
        let t = translator("```js db.users.countDocuments({})```");
        let envelope = t.translate("how many users").await.unwrap();
        assert_eq!(envelope.generated_command, "db.users.countDocuments({})");
        assert_eq!(envelope.db_result, json!(0));
    }

    #[test]
    fn test_instructions_cover_every_operation() {
        for op in [
            "createCollection",
            "dropDatabase",
            "listCollections",
            "runCommand",
            "find",
            "insertOne",
            "updateOne",
            "updateMany",
            "deleteOne",
            "deleteMany",
            "createIndex",
            "countDocuments",
            "aggregate",
        ] {
            assert!(INSTRUCTIONS.contains(&format!(".{}(", op)), "missing example for {}", op);
        }
    }

    #[tokio::test]
    async fn test_missing_query() {
        let t = translator("db.users.find({})");
        let err = t.translate("   ").await.unwrap_err();
        assert!(matches!(err, TranslateError::MissingQuery));
    }

    #[tokio::test]
    async fn test_generator_failure_is_transport_level() {
        let t = Translator::new(
            Arc::new(StaticGenerator::failing("connection refused")),
            Arc::new(MemoryStore::new("app")),
        );
        let err = t.translate("show all users").await.unwrap_err();
        assert!(err.is_transport_level());
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_fenced_reply_is_cleaned() {
        let t = translator("```\ndb.users.countDocuments({})\n```");
        let envelope = t.translate("how many users").await.unwrap();
        assert_eq!(envelope.generated_command, "db.users.countDocuments({})");
        assert_eq!(envelope.db_result, json!(0));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_data() {
        let t = translator("I am not sure what you mean.");
        let envelope = t.translate("do something").await.unwrap();
        assert_eq!(envelope.user_query, "do something");
        assert_eq!(envelope.db_result["command"], "I am not sure what you mean.");
        assert!(envelope.db_result["error"].is_string());
    }
}
