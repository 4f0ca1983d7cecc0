//! MongoDB-backed [`DocumentStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::options::CreateCollectionOptions;
use mongodb::results::CollectionType;
use mongodb::{Client, Collection, Database, IndexModel};

use super::{CollectionInfo, DeleteOutcome, DocumentStore, InsertOutcome, UpdateOutcome};

/// Store backed by a live MongoDB database handle.
///
/// The driver's `Database` is cheap to clone and internally pooled, so one
/// instance is shared by every request.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect to `uri` and bind to `database`.
    ///
    /// The driver connects lazily; a `ping` is issued so a bad URI or an
    /// unreachable server is reported at startup instead of on first request.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .with_context(|| "Failed to parse MongoDB connection string")?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 })
            .await
            .with_context(|| format!("Failed to reach MongoDB database '{}'", database))?;
        Ok(Self { db })
    }

    /// Wrap an existing database handle.
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn collection_type_name(kind: &CollectionType) -> &'static str {
    match kind {
        CollectionType::Collection => "collection",
        CollectionType::View => "view",
        CollectionType::Timeseries => "timeseries",
        #[allow(unreachable_patterns)]
        _ => "unknown",
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn database_name(&self) -> &str {
        self.db.name()
    }

    async fn find(&self, collection: &str, filter: Document, limit: i64) -> Result<Vec<Document>> {
        let cursor = self.collection(collection).find(filter).limit(limit).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<InsertOutcome> {
        let result = self.collection(collection).insert_one(document).await?;
        Ok(InsertOutcome {
            inserted_id: result.inserted_id,
        })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        let result = self.collection(collection).update_one(filter, update).await?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .update_many(filter, update)
            .await?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteOutcome> {
        let result = self.collection(collection).delete_one(filter).await?;
        Ok(DeleteOutcome {
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteOutcome> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(DeleteOutcome {
            deleted_count: result.deleted_count,
        })
    }

    async fn create_index(&self, collection: &str, keys: Document) -> Result<String> {
        let model = IndexModel::builder().keys(keys).build();
        let result = self.collection(collection).create_index(model).await?;
        Ok(result.index_name)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64> {
        Ok(self.collection(collection).count_documents(filter).await?)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let cursor = self.collection(collection).aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn create_collection(&self, name: &str, options: Option<Document>) -> Result<()> {
        match options {
            Some(options) => {
                let options: CreateCollectionOptions = bson::from_document(options)
                    .with_context(|| "invalid createCollection options")?;
                self.db.create_collection(name).with_options(options).await?;
            }
            None => self.db.create_collection(name).await?,
        }
        Ok(())
    }

    async fn drop_database(&self) -> Result<Document> {
        Ok(self.db.run_command(doc! { "dropDatabase": 1 }).await?)
    }

    async fn list_collections(&self, filter: Document) -> Result<Vec<CollectionInfo>> {
        let mut cursor = self.db.list_collections().filter(filter).await?;
        let mut out = Vec::new();
        while let Some(spec) = cursor.try_next().await? {
            let options = bson::to_document(&spec.options)
                .with_context(|| format!("invalid options for collection '{}'", spec.name))?;
            out.push(CollectionInfo {
                collection_type: collection_type_name(&spec.collection_type).to_string(),
                options,
                name: spec.name,
            });
        }
        Ok(out)
    }

    async fn run_command(&self, command: Document) -> Result<Document> {
        Ok(self.db.run_command(command).await?)
    }
}
