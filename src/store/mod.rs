//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is the only way the dispatcher touches a
//! database. It is constructed once at startup and shared across requests as
//! an `Arc<dyn DocumentStore>`; connection pooling and concurrency safety are
//! the backend's responsibility.
//!
//! Implementations:
//! - [`mongo::MongoStore`]: the official MongoDB driver, bound to one database.
//! - [`memory::MemoryStore`]: an in-process store for tests and dry runs.
//!
//! Every method returns plain data. Cursors are drained and collection handles
//! dropped inside the backend, so nothing returned here holds a connection.
//!
//! # Operations
//!
//! | Method | Scope |
//! |--------|-------|
//! | [`find`](DocumentStore::find) | collection |
//! | [`insert_one`](DocumentStore::insert_one) | collection |
//! | [`update_one`](DocumentStore::update_one) / [`update_many`](DocumentStore::update_many) | collection |
//! | [`delete_one`](DocumentStore::delete_one) / [`delete_many`](DocumentStore::delete_many) | collection |
//! | [`create_index`](DocumentStore::create_index) | collection |
//! | [`count_documents`](DocumentStore::count_documents) | collection |
//! | [`aggregate`](DocumentStore::aggregate) | collection |
//! | [`create_collection`](DocumentStore::create_collection) | database |
//! | [`drop_database`](DocumentStore::drop_database) | database |
//! | [`list_collections`](DocumentStore::list_collections) | database |
//! | [`run_command`](DocumentStore::run_command) | database |

pub mod memory;
pub mod mongo;

use anyhow::Result;
use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

/// Outcome of a single-document insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    pub inserted_id: Bson,
}

/// Outcome of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Outcome of a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

/// One entry from a collection listing.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    /// `"collection"`, `"view"` or `"timeseries"`.
    pub collection_type: String,
    pub options: Document,
}

/// Abstract document store bound to a single pre-selected database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the database this store operates on.
    fn database_name(&self) -> &str;

    /// Return at most `limit` documents matching `filter`.
    async fn find(&self, collection: &str, filter: Document, limit: i64) -> Result<Vec<Document>>;

    async fn insert_one(&self, collection: &str, document: Document) -> Result<InsertOutcome>;

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome>;

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome>;

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteOutcome>;

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteOutcome>;

    /// Create an index over `keys` and return its name.
    async fn create_index(&self, collection: &str, keys: Document) -> Result<String>;

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64>;

    /// Run an aggregation pipeline, draining every result.
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>>;

    async fn create_collection(&self, name: &str, options: Option<Document>) -> Result<()>;

    /// Drop the active database, returning the server's reply.
    async fn drop_database(&self) -> Result<Document>;

    async fn list_collections(&self, filter: Document) -> Result<Vec<CollectionInfo>>;

    /// Issue a raw database command, returning the server's reply.
    async fn run_command(&self, command: Document) -> Result<Document>;
}
