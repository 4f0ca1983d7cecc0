//! Operation dispatch.
//!
//! Maps a [`MatchedCommand`] onto a [`DocumentStore`] call:
//!
//! 1. Look the operation name up in the database- or collection-level table.
//! 2. Split and normalize the raw argument text per operation.
//! 3. Call the store.
//! 4. Render the outcome as JSON (relaxed Extended JSON for BSON values).
//!
//! Every failure is captured and returned as `{"error": "<context>: <message>"}`;
//! [`Dispatcher::dispatch`] never returns an `Err`. Argument validation happens
//! before the store is touched, so a rejected command has no side effects.
//!
//! # Database-level operations
//!
//! | Operation | Arguments | Result |
//! |-----------|-----------|--------|
//! | `createCollection` | name, optional options | `{acknowledged, collectionName, message}` |
//! | `dropDatabase` | none | server reply |
//! | `listCollections` | optional filter | `[{name, type, options}]` |
//! | `runCommand` | command document | server reply |
//!
//! # Collection-level operations
//!
//! | Operation | Arguments | Result |
//! |-----------|-----------|--------|
//! | `find` | optional filter | up to [`FIND_LIMIT`] documents |
//! | `insertOne` | document | `{acknowledged, insertedId}` |
//! | `updateOne` / `updateMany` | filter, update | `{acknowledged, matchedCount, modifiedCount, upsertedId}` |
//! | `deleteOne` / `deleteMany` | filter | `{acknowledged, deletedCount}` |
//! | `createIndex` | key specification | index name |
//! | `countDocuments` | optional filter | integer |
//! | `aggregate` | pipeline array (strict JSON) | documents |

use mongodb::bson::{self, Bson, Document};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{OperationScope, TranslateError};
use crate::matcher::MatchedCommand;
use crate::normalize::{decode_strict, normalize, split_top_level, DecodePath};
use crate::store::{CollectionInfo, DeleteOutcome, DocumentStore, UpdateOutcome};

/// Maximum number of documents a `find` returns.
pub const FIND_LIMIT: i64 = 5;

/// Database-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOperation {
    CreateCollection,
    DropDatabase,
    ListCollections,
    RunCommand,
}

impl DbOperation {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "createCollection" => DbOperation::CreateCollection,
            "dropDatabase" => DbOperation::DropDatabase,
            "listCollections" => DbOperation::ListCollections,
            "runCommand" => DbOperation::RunCommand,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DbOperation::CreateCollection => "createCollection",
            DbOperation::DropDatabase => "dropDatabase",
            DbOperation::ListCollections => "listCollections",
            DbOperation::RunCommand => "runCommand",
        }
    }
}

/// Collection-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOperation {
    Find,
    InsertOne,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    CreateIndex,
    CountDocuments,
    Aggregate,
}

impl CollectionOperation {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "find" => CollectionOperation::Find,
            "insertOne" => CollectionOperation::InsertOne,
            "updateOne" => CollectionOperation::UpdateOne,
            "updateMany" => CollectionOperation::UpdateMany,
            "deleteOne" => CollectionOperation::DeleteOne,
            "deleteMany" => CollectionOperation::DeleteMany,
            "createIndex" => CollectionOperation::CreateIndex,
            "countDocuments" => CollectionOperation::CountDocuments,
            "aggregate" => CollectionOperation::Aggregate,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CollectionOperation::Find => "find",
            CollectionOperation::InsertOne => "insertOne",
            CollectionOperation::UpdateOne => "updateOne",
            CollectionOperation::UpdateMany => "updateMany",
            CollectionOperation::DeleteOne => "deleteOne",
            CollectionOperation::DeleteMany => "deleteMany",
            CollectionOperation::CreateIndex => "createIndex",
            CollectionOperation::CountDocuments => "countDocuments",
            CollectionOperation::Aggregate => "aggregate",
        }
    }
}

/// Executes matched commands against an injected store.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn DocumentStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Run a command and return its JSON result, embedding any failure as
    /// `{"error": ...}`.
    pub async fn dispatch(&self, command: &MatchedCommand) -> Value {
        match self.execute(command).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    operation = command.operation(),
                    collection = command.collection(),
                    code = e.code(),
                    "command failed: {}",
                    e
                );
                e.to_result_value()
            }
        }
    }

    /// Run a command, returning the typed error on failure.
    pub async fn execute(&self, command: &MatchedCommand) -> Result<Value, TranslateError> {
        tracing::debug!(
            operation = command.operation(),
            collection = command.collection(),
            "dispatching"
        );
        match command {
            MatchedCommand::DbLevel {
                operation,
                raw_args,
            } => {
                let op = DbOperation::from_name(operation).ok_or_else(|| {
                    TranslateError::UnsupportedOperation {
                        scope: OperationScope::Database,
                        name: operation.clone(),
                    }
                })?;
                self.run_db(op, raw_args).await
            }
            MatchedCommand::CollectionLevel {
                collection,
                operation,
                raw_args,
            } => {
                let op = CollectionOperation::from_name(operation).ok_or_else(|| {
                    TranslateError::UnsupportedOperation {
                        scope: OperationScope::Collection,
                        name: operation.clone(),
                    }
                })?;
                self.run_collection(op, collection, raw_args).await
            }
        }
    }

    async fn run_db(&self, op: DbOperation, raw_args: &str) -> Result<Value, TranslateError> {
        let name = op.name();
        match op {
            DbOperation::CreateCollection => {
                let segments = split_top_level(raw_args);
                let first = segments
                    .first()
                    .ok_or_else(|| TranslateError::invalid(name, "a collection name is required"))?;
                let collection = match decode_value(name, first)? {
                    Value::String(s) if !s.is_empty() => s,
                    other => {
                        return Err(TranslateError::invalid(
                            name,
                            format!(
                                "collection name must be a non-empty string, got {}",
                                kind_of(&other)
                            ),
                        ))
                    }
                };
                let options = match segments.get(1) {
                    Some(text) => Some(document_arg(name, text)?),
                    None => None,
                };
                self.store
                    .create_collection(&collection, options)
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(json!({
                    "acknowledged": true,
                    "collectionName": collection,
                    "message": format!("Collection '{}' created successfully", collection),
                }))
            }
            DbOperation::DropDatabase => {
                let reply = self
                    .store
                    .drop_database()
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(document_to_json(reply))
            }
            DbOperation::ListCollections => {
                let filter = first_segment_document(name, raw_args)?;
                let infos = self
                    .store
                    .list_collections(filter)
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(Value::Array(infos.into_iter().map(collection_info_to_json).collect()))
            }
            DbOperation::RunCommand => {
                let command = document_arg(name, raw_args)?;
                if command.is_empty() {
                    return Err(TranslateError::invalid(name, "a command document is required"));
                }
                let reply = self
                    .store
                    .run_command(command)
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(document_to_json(reply))
            }
        }
    }

    async fn run_collection(
        &self,
        op: CollectionOperation,
        collection: &str,
        raw_args: &str,
    ) -> Result<Value, TranslateError> {
        let name = op.name();
        let store = &self.store;
        match op {
            CollectionOperation::Find => {
                let filter = first_segment_document(name, raw_args)?;
                let docs = store
                    .find(collection, filter, FIND_LIMIT)
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(documents_to_json(docs.into_iter().take(FIND_LIMIT as usize)))
            }
            CollectionOperation::InsertOne => {
                let document = document_arg(name, raw_args)?;
                let outcome = store
                    .insert_one(collection, document)
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(json!({
                    "acknowledged": true,
                    "insertedId": outcome.inserted_id.into_relaxed_extjson(),
                }))
            }
            CollectionOperation::UpdateOne | CollectionOperation::UpdateMany => {
                let segments = split_top_level(raw_args);
                if segments.len() != 2 {
                    return Err(TranslateError::invalid(
                        name,
                        format!(
                            "expected a filter and an update document, got {} argument(s)",
                            segments.len()
                        ),
                    ));
                }
                let filter = document_arg(name, segments[0])?;
                let update = document_arg(name, segments[1])?;
                let outcome = if op == CollectionOperation::UpdateOne {
                    store.update_one(collection, filter, update).await
                } else {
                    store.update_many(collection, filter, update).await
                }
                .map_err(|e| TranslateError::store(name, e))?;
                Ok(update_to_json(outcome))
            }
            CollectionOperation::DeleteOne | CollectionOperation::DeleteMany => {
                let filter = document_arg(name, raw_args)?;
                let outcome = if op == CollectionOperation::DeleteOne {
                    store.delete_one(collection, filter).await
                } else {
                    store.delete_many(collection, filter).await
                }
                .map_err(|e| TranslateError::store(name, e))?;
                Ok(delete_to_json(outcome))
            }
            CollectionOperation::CreateIndex => {
                let segments = split_top_level(raw_args);
                let spec = segments.first().ok_or_else(|| {
                    TranslateError::invalid(name, "an index key specification is required")
                })?;
                let keys = document_arg(name, spec)?;
                if keys.is_empty() {
                    return Err(TranslateError::invalid(
                        name,
                        "index key specification must not be empty",
                    ));
                }
                let index = store
                    .create_index(collection, keys)
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(Value::String(index))
            }
            CollectionOperation::CountDocuments => {
                let filter = first_segment_document(name, raw_args)?;
                let count = store
                    .count_documents(collection, filter)
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(json!(count))
            }
            CollectionOperation::Aggregate => {
                let pipeline = pipeline_arg(name, raw_args)?;
                let docs = store
                    .aggregate(collection, pipeline)
                    .await
                    .map_err(|e| TranslateError::store(name, e))?;
                Ok(documents_to_json(docs))
            }
        }
    }
}

// ============ Argument decoding ============

fn decode_value(operation: &str, text: &str) -> Result<Value, TranslateError> {
    let normalized = normalize(text).map_err(|e| TranslateError::malformed(operation, e))?;
    if normalized.path == DecodePath::Repaired {
        tracing::debug!(operation, text, "arguments decoded after repair");
    }
    Ok(normalized.value)
}

/// Decode text that must be a document. Empty text yields `{}`.
fn document_arg(operation: &str, text: &str) -> Result<Document, TranslateError> {
    match decode_value(operation, text)? {
        Value::Object(map) => bson::to_document(&map).map_err(|e| {
            TranslateError::invalid(operation, format!("document cannot be converted: {}", e))
        }),
        other => Err(TranslateError::invalid(
            operation,
            format!("expected a document, got {}", kind_of(&other)),
        )),
    }
}

/// Decode only the first top-level segment as a document, defaulting to `{}`.
fn first_segment_document(operation: &str, raw_args: &str) -> Result<Document, TranslateError> {
    match split_top_level(raw_args).first() {
        Some(text) => document_arg(operation, text),
        None => Ok(Document::new()),
    }
}

/// Decode an aggregation pipeline. Strict JSON only; must be an array of
/// documents.
fn pipeline_arg(operation: &str, raw_args: &str) -> Result<Vec<Document>, TranslateError> {
    let value = decode_strict(raw_args).map_err(|e| TranslateError::malformed(operation, e))?;
    let stages = match value {
        Value::Array(stages) => stages,
        other => {
            return Err(TranslateError::invalid(
                operation,
                format!("pipeline must be an array, got {}", kind_of(&other)),
            ))
        }
    };
    stages
        .into_iter()
        .enumerate()
        .map(|(i, stage)| match stage {
            Value::Object(map) => bson::to_document(&map).map_err(|e| {
                TranslateError::invalid(operation, format!("stage {} cannot be converted: {}", i, e))
            }),
            other => Err(TranslateError::invalid(
                operation,
                format!("pipeline stage {} must be a document, got {}", i, kind_of(&other)),
            )),
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a document",
    }
}

// ============ Result sanitization ============

fn document_to_json(doc: Document) -> Value {
    Bson::Document(doc).into_relaxed_extjson()
}

fn documents_to_json(docs: impl IntoIterator<Item = Document>) -> Value {
    Value::Array(docs.into_iter().map(document_to_json).collect())
}

fn update_to_json(outcome: UpdateOutcome) -> Value {
    json!({
        "acknowledged": true,
        "matchedCount": outcome.matched_count,
        "modifiedCount": outcome.modified_count,
        "upsertedId": outcome.upserted_id.map(Bson::into_relaxed_extjson),
    })
}

fn delete_to_json(outcome: DeleteOutcome) -> Value {
    json!({
        "acknowledged": true,
        "deletedCount": outcome.deleted_count,
    })
}

fn collection_info_to_json(info: CollectionInfo) -> Value {
    json!({
        "name": info.name,
        "type": info.collection_type,
        "options": document_to_json(info.options),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::match_command;
    use crate::store::memory::MemoryStore;
    use mongodb::bson::doc;

    fn dispatcher_with_users(n: usize) -> (Dispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new("app"));
        let docs = (0..n)
            .map(|i| doc! { "name": format!("user{}", i), "age": 20 + i as i32 })
            .collect();
        store.seed("users", docs).unwrap();
        (Dispatcher::new(store.clone()), store)
    }

    async fn run(d: &Dispatcher, command: &str) -> Value {
        d.dispatch(&match_command(command).unwrap()).await
    }

    #[tokio::test]
    async fn test_find_caps_results() {
        let (d, _) = dispatcher_with_users(12);
        let out = run(&d, "db.users.find({})").await;
        assert_eq!(out.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_find_honors_only_first_segment() {
        let (d, _) = dispatcher_with_users(3);
        let out = run(&d, r#"db.users.find({name: 'user1'}, {"age": 0})"#).await;
        let docs = out.as_array().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], "user1");
        assert!(docs[0]["_id"]["$oid"].is_string());
    }

    #[tokio::test]
    async fn test_insert_one() {
        let (d, store) = dispatcher_with_users(0);
        let out = run(&d, "db.users.insertOne({name: 'Ada', age: 36})").await;
        assert_eq!(out["acknowledged"], true);
        assert!(out["insertedId"]["$oid"].is_string());
        assert_eq!(store.documents("users").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_many() {
        let (d, _) = dispatcher_with_users(4);
        let out = run(
            &d,
            r#"db.users.updateMany({"age": {"$gte": 22}}, {"$set": {"senior": true}})"#,
        )
        .await;
        assert_eq!(out["matchedCount"], 2);
        assert_eq!(out["modifiedCount"], 2);
        assert_eq!(out["upsertedId"], Value::Null);
    }

    #[tokio::test]
    async fn test_update_requires_two_segments() {
        let (d, store) = dispatcher_with_users(2);
        let err = d
            .execute(&match_command(r#"db.users.updateOne({"name": "user0"})"#).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidArguments { .. }));
        let names: Vec<_> = store
            .documents("users")
            .unwrap()
            .iter()
            .map(|d| d.get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["user0", "user1"]);
    }

    #[tokio::test]
    async fn test_delete_one_and_many() {
        let (d, _) = dispatcher_with_users(3);
        let out = run(&d, r#"db.users.deleteOne({"name": "user0"})"#).await;
        assert_eq!(out["deletedCount"], 1);
        let out = run(&d, "db.users.deleteMany({})").await;
        assert_eq!(out["deletedCount"], 2);
    }

    #[tokio::test]
    async fn test_create_index_uses_first_segment() {
        let (d, _) = dispatcher_with_users(1);
        let out = run(&d, "db.users.createIndex({email: 1}, {unique: true})").await;
        assert_eq!(out, json!("email_1"));
    }

    #[tokio::test]
    async fn test_count_documents() {
        let (d, _) = dispatcher_with_users(7);
        assert_eq!(run(&d, "db.users.countDocuments()").await, json!(7));
        assert_eq!(
            run(&d, r#"db.users.countDocuments({"age": {"$lt": 23}})"#).await,
            json!(3)
        );
    }

    #[tokio::test]
    async fn test_aggregate_requires_array() {
        let (d, _) = dispatcher_with_users(2);
        let out = run(&d, r#"db.users.aggregate({"$match": {}})"#).await;
        let msg = out["error"].as_str().unwrap();
        assert!(msg.starts_with("aggregate: "), "{}", msg);
        assert!(msg.contains("array"), "{}", msg);
    }

    #[tokio::test]
    async fn test_aggregate_is_strict_only() {
        let (d, _) = dispatcher_with_users(2);
        let out = run(&d, "db.users.aggregate([{$match: {name: 'user1'}}])").await;
        assert!(out["error"].as_str().unwrap().contains("could not decode"));

        let out = run(
            &d,
            r#"db.users.aggregate([{"$match": {"name": "user1"}}, {"$count": "n"}])"#,
        )
        .await;
        assert_eq!(out, json!([{ "n": 1 }]));
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let (d, _) = dispatcher_with_users(0);
        assert_eq!(
            run(&d, "db.users.unknownOp({})").await,
            json!({ "error": "Unsupported MongoDB collection operation: unknownOp" })
        );
        assert_eq!(
            run(&d, "db.shutdownServer()").await,
            json!({ "error": "Unsupported MongoDB database operation: shutdownServer" })
        );
    }

    #[tokio::test]
    async fn test_create_collection() {
        let (d, _) = dispatcher_with_users(0);
        let out = run(&d, "db.createCollection('logs', {capped: true, size: 4096})").await;
        assert_eq!(out["acknowledged"], true);
        assert_eq!(out["collectionName"], "logs");
        assert!(out["message"].as_str().unwrap().contains("logs"));

        let out = run(&d, "db.createCollection({name: 'logs'})").await;
        assert!(out["error"].as_str().unwrap().contains("must be a non-empty string"));

        let out = run(&d, "db.createCollection('logs')").await;
        assert!(out["error"].as_str().unwrap().starts_with("createCollection: "));
    }

    #[tokio::test]
    async fn test_list_collections() {
        let (d, _) = dispatcher_with_users(1);
        run(&d, r#"db.createCollection("orders")"#).await;
        let out = run(&d, "db.listCollections()").await;
        assert_eq!(
            out,
            json!([
                { "name": "orders", "type": "collection", "options": {} },
                { "name": "users", "type": "collection", "options": {} },
            ])
        );
        let out = run(&d, r#"db.listCollections({"name": "users"})"#).await;
        assert_eq!(out.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_database_and_run_command() {
        let (d, store) = dispatcher_with_users(2);
        let out = run(&d, "db.runCommand({ping: 1})").await;
        assert_eq!(out["ok"], 1.0);
        let out = run(&d, "db.runCommand()").await;
        assert!(out["error"].as_str().unwrap().starts_with("runCommand: "));

        let out = run(&d, "db.dropDatabase()").await;
        assert_eq!(out["dropped"], "app");
        assert!(store.documents("users").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_arguments_reported() {
        let (d, _) = dispatcher_with_users(1);
        let out = run(&d, "db.users.find({name: })").await;
        let msg = out["error"].as_str().unwrap();
        assert!(msg.starts_with("find: could not decode arguments"), "{}", msg);
        assert!(msg.contains("{name: }"));
    }

    #[tokio::test]
    async fn test_non_document_filter_rejected() {
        let (d, _) = dispatcher_with_users(1);
        let out = run(&d, "db.users.deleteMany([1, 2])").await;
        assert!(out["error"].as_str().unwrap().contains("expected a document"));
    }

    #[tokio::test]
    async fn test_store_failure_is_embedded() {
        let (d, _) = dispatcher_with_users(1);
        let out = run(&d, r#"db.users.updateOne({}, {"name": "x"})"#).await;
        let msg = out["error"].as_str().unwrap();
        assert!(msg.starts_with("updateOne: "), "{}", msg);
        assert!(msg.contains("atomic operators"), "{}", msg);
    }
}
