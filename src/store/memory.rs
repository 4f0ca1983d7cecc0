//! In-memory [`DocumentStore`] for tests and offline dry runs.
//!
//! Collections are `Vec<Document>` behind a `std::sync::RwLock`. Query support
//! is small: top-level and dotted-path equality, the comparison
//! operators `$eq $ne $gt $gte $lt $lte $in $nin $exists`, and `$and`/`$or`.
//! Updates understand `$set`, `$unset` and `$inc` on top-level or dotted
//! paths. Aggregation understands `$match`, `$limit`, `$skip` and `$count`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};

use super::{CollectionInfo, DeleteOutcome, DocumentStore, InsertOutcome, UpdateOutcome};

#[derive(Default)]
struct MemCollection {
    docs: Vec<Document>,
    indexes: Vec<String>,
}

/// In-process store. Collection order is stable (sorted by name).
pub struct MemoryStore {
    name: String,
    collections: RwLock<BTreeMap<String, MemCollection>>,
}

impl MemoryStore {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            name: database.into(),
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert documents directly, creating the collection if needed.
    ///
    /// Documents without an `_id` are given a fresh `ObjectId`.
    pub fn seed(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        let mut guard = self.write()?;
        let coll = guard.entry(collection.to_string()).or_default();
        for mut d in docs {
            ensure_id(&mut d);
            coll.docs.push(d);
        }
        Ok(())
    }

    /// Snapshot of a collection's documents, in insertion order.
    pub fn documents(&self, collection: &str) -> Result<Vec<Document>> {
        let guard = self.read()?;
        Ok(guard
            .get(collection)
            .map(|c| c.docs.clone())
            .unwrap_or_default())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, MemCollection>>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, MemCollection>>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        many: bool,
    ) -> Result<UpdateOutcome> {
        validate_update(update)?;
        let mut guard = self.write()?;
        let mut outcome = UpdateOutcome {
            matched_count: 0,
            modified_count: 0,
            upserted_id: None,
        };
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(outcome);
        };
        for d in coll.docs.iter_mut() {
            if !matches_filter(d, filter) {
                continue;
            }
            outcome.matched_count += 1;
            // Apply to a copy so a failing modifier leaves the document untouched.
            let mut next = d.clone();
            apply_update(&mut next, update)?;
            if next != *d {
                *d = next;
                outcome.modified_count += 1;
            }
            if !many {
                break;
            }
        }
        Ok(outcome)
    }

    fn delete(&self, collection: &str, filter: &Document, many: bool) -> Result<DeleteOutcome> {
        let mut guard = self.write()?;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(DeleteOutcome { deleted_count: 0 });
        };
        let mut deleted = 0u64;
        coll.docs.retain(|d| {
            if (many || deleted == 0) && matches_filter(d, filter) {
                deleted += 1;
                false
            } else {
                true
            }
        });
        Ok(DeleteOutcome {
            deleted_count: deleted,
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("test")
    }
}

fn ensure_id(d: &mut Document) {
    if !d.contains_key("_id") {
        // `_id` goes first, as the server stores it.
        let mut with_id = doc! { "_id": ObjectId::new() };
        for (k, v) in std::mem::replace(d, Document::new()) {
            with_id.insert(k, v);
        }
        *d = with_id;
    }
}

// ============ Filter evaluation ============

fn lookup<'a>(d: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = d.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_f64(b: &Bson) -> Option<f64> {
    match b {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare(a, b) == Some(Ordering::Equal) || a == b
}

/// Equality against a field, with array fields matching any element.
fn field_equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(v) => values_equal(v, expected),
        None => matches!(expected, Bson::Null),
    }
}

fn is_operator_doc(cond: &Bson) -> bool {
    matches!(cond, Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')))
}

fn matches_operators(value: Option<&Bson>, ops: &Document) -> bool {
    ops.iter().all(|(op, arg)| match op.as_str() {
        "$eq" => field_equals(value, arg),
        "$ne" => !field_equals(value, arg),
        "$gt" => value.and_then(|v| compare(v, arg)) == Some(Ordering::Greater),
        "$gte" => matches!(
            value.and_then(|v| compare(v, arg)),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "$lt" => value.and_then(|v| compare(v, arg)) == Some(Ordering::Less),
        "$lte" => matches!(
            value.and_then(|v| compare(v, arg)),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "$in" => match arg {
            Bson::Array(options) => options.iter().any(|o| field_equals(value, o)),
            _ => false,
        },
        "$nin" => match arg {
            Bson::Array(options) => !options.iter().any(|o| field_equals(value, o)),
            _ => true,
        },
        "$exists" => value.is_some() == arg.as_bool().unwrap_or(true),
        _ => false,
    })
}

fn matches_filter(d: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, cond)| match key.as_str() {
        "$and" => match cond {
            Bson::Array(clauses) => clauses
                .iter()
                .all(|c| matches!(c, Bson::Document(f) if matches_filter(d, f))),
            _ => false,
        },
        "$or" => match cond {
            Bson::Array(clauses) => clauses
                .iter()
                .any(|c| matches!(c, Bson::Document(f) if matches_filter(d, f))),
            _ => false,
        },
        _ => {
            let value = lookup(d, key);
            match cond {
                Bson::Document(ops) if is_operator_doc(cond) => matches_operators(value, ops),
                _ => field_equals(value, cond),
            }
        }
    })
}

// ============ Updates ============

fn validate_update(update: &Document) -> Result<()> {
    if update.is_empty() {
        bail!("update document must not be empty");
    }
    for key in update.keys() {
        if !key.starts_with('$') {
            bail!("update document requires atomic operators, found '{}'", key);
        }
    }
    Ok(())
}

fn apply_update(d: &mut Document, update: &Document) -> Result<()> {
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            bail!("modifier {} expects a document", op);
        };
        match op.as_str() {
            "$set" => {
                for (k, v) in fields {
                    set_path(d, k, v.clone())?;
                }
            }
            "$unset" => {
                for k in fields.keys() {
                    remove_path(d, k);
                }
            }
            "$inc" => {
                for (k, by) in fields {
                    let next = increment(lookup(d, k), by)
                        .ok_or_else(|| anyhow!("cannot apply $inc to '{}'", k))??;
                    set_path(d, k, next)?;
                }
            }
            other => bail!("unsupported update operator: {}", other),
        }
    }
    Ok(())
}

/// `None` when either side is non-numeric; `Some(Err)` on integer overflow.
fn increment(current: Option<&Bson>, by: &Bson) -> Option<Result<Bson>> {
    let overflow = || anyhow!("$inc overflows");
    let next = match (current, by) {
        (None, by) => {
            as_f64(by)?;
            Ok(by.clone())
        }
        (Some(Bson::Int32(a)), Bson::Int32(b)) => {
            a.checked_add(*b).map(Bson::Int32).ok_or_else(overflow)
        }
        (Some(Bson::Int64(a)), Bson::Int64(b)) => {
            a.checked_add(*b).map(Bson::Int64).ok_or_else(overflow)
        }
        (Some(Bson::Int32(a)), Bson::Int64(b)) => {
            (*a as i64).checked_add(*b).map(Bson::Int64).ok_or_else(overflow)
        }
        (Some(Bson::Int64(a)), Bson::Int32(b)) => {
            a.checked_add(*b as i64).map(Bson::Int64).ok_or_else(overflow)
        }
        (Some(a), b) => Ok(Bson::Double(as_f64(a)? + as_f64(b)?)),
    };
    Some(next)
}

/// Write `value` at a dotted path, creating intermediate documents.
fn set_path(d: &mut Document, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            d.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = d
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            match child {
                Bson::Document(inner) => set_path(inner, rest, value),
                _ => bail!("cannot create field '{}' in non-document '{}'", rest, head),
            }
        }
    }
}

fn remove_path(d: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            d.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = d.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(k, v)| {
            let dir = match v {
                Bson::String(s) => s.clone(),
                other => as_f64(other)
                    .map(|f| (f as i64).to_string())
                    .unwrap_or_else(|| other.to_string()),
            };
            format!("{}_{}", k, dir)
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn find(&self, collection: &str, filter: Document, limit: i64) -> Result<Vec<Document>> {
        let guard = self.read()?;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        let cap = if limit > 0 { limit as usize } else { usize::MAX };
        Ok(coll
            .docs
            .iter()
            .filter(|d| matches_filter(d, &filter))
            .take(cap)
            .cloned()
            .collect())
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> Result<InsertOutcome> {
        ensure_id(&mut document);
        let inserted_id = document
            .get("_id")
            .cloned()
            .ok_or_else(|| anyhow!("document is missing _id"))?;
        let mut guard = self.write()?;
        let coll = guard.entry(collection.to_string()).or_default();
        if coll
            .docs
            .iter()
            .any(|d| d.get("_id").is_some_and(|id| id == &inserted_id))
        {
            bail!("E11000 duplicate key error collection: {}.{}", self.name, collection);
        }
        coll.docs.push(document);
        Ok(InsertOutcome { inserted_id })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        self.update(collection, &filter, &update, false)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        self.update(collection, &filter, &update, true)
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteOutcome> {
        self.delete(collection, &filter, false)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteOutcome> {
        self.delete(collection, &filter, true)
    }

    async fn create_index(&self, collection: &str, keys: Document) -> Result<String> {
        if keys.is_empty() {
            bail!("index key specification must not be empty");
        }
        let name = index_name(&keys);
        let mut guard = self.write()?;
        let coll = guard.entry(collection.to_string()).or_default();
        if !coll.indexes.contains(&name) {
            coll.indexes.push(name.clone());
        }
        Ok(name)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64> {
        let guard = self.read()?;
        Ok(guard
            .get(collection)
            .map(|c| c.docs.iter().filter(|d| matches_filter(d, &filter)).count() as u64)
            .unwrap_or(0))
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let mut docs = self.documents(collection)?;
        for stage in &pipeline {
            let (name, arg) = stage
                .iter()
                .next()
                .ok_or_else(|| anyhow!("empty pipeline stage"))?;
            match name.as_str() {
                "$match" => {
                    let Bson::Document(filter) = arg else {
                        bail!("$match expects a document");
                    };
                    docs.retain(|d| matches_filter(d, filter));
                }
                "$limit" => {
                    let n = as_f64(arg).ok_or_else(|| anyhow!("$limit expects a number"))?;
                    docs.truncate(n.max(0.0) as usize);
                }
                "$skip" => {
                    let n = as_f64(arg).ok_or_else(|| anyhow!("$skip expects a number"))? as usize;
                    docs = docs.into_iter().skip(n).collect();
                }
                "$count" => {
                    let field = arg
                        .as_str()
                        .ok_or_else(|| anyhow!("$count expects a field name"))?;
                    let count = docs.len() as i64;
                    docs = if count == 0 {
                        Vec::new()
                    } else {
                        let mut out = Document::new();
                        out.insert(field, count);
                        vec![out]
                    };
                }
                other => bail!("Unrecognized pipeline stage name: '{}'", other),
            }
        }
        Ok(docs)
    }

    async fn create_collection(&self, name: &str, options: Option<Document>) -> Result<()> {
        if let Some(options) = &options {
            if let Some(key) = options
                .keys()
                .find(|k| !matches!(k.as_str(), "capped" | "size" | "max" | "validator"))
            {
                bail!("unknown createCollection option: {}", key);
            }
        }
        let mut guard = self.write()?;
        if guard.contains_key(name) {
            bail!("Collection {}.{} already exists.", self.name, name);
        }
        guard.insert(name.to_string(), MemCollection::default());
        Ok(())
    }

    async fn drop_database(&self) -> Result<Document> {
        self.write()?.clear();
        Ok(doc! { "dropped": self.name.as_str(), "ok": 1.0 })
    }

    async fn list_collections(&self, filter: Document) -> Result<Vec<CollectionInfo>> {
        let guard = self.read()?;
        Ok(guard
            .keys()
            .filter(|name| matches_filter(&doc! { "name": name.as_str(), "type": "collection" }, &filter))
            .map(|name| CollectionInfo {
                name: name.clone(),
                collection_type: "collection".to_string(),
                options: Document::new(),
            })
            .collect())
    }

    async fn run_command(&self, command: Document) -> Result<Document> {
        let name = command
            .keys()
            .next()
            .ok_or_else(|| anyhow!("command document must not be empty"))?;
        match name.as_str() {
            "ping" => Ok(doc! { "ok": 1.0 }),
            "count" => {
                let collection = command.get_str("count")?;
                let n = self.count_documents(collection, Document::new()).await?;
                Ok(doc! { "n": n as i64, "ok": 1.0 })
            }
            other => bail!("no such command: '{}'", other),
        }
    }
}
