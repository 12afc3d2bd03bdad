//! MongoDB client and collection wrapper

use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::types::BoardError;

/// Server code for a unique index violation
const DUPLICATE_KEY: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, BoardError> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| BoardError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| BoardError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, BoardError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, BoardError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), BoardError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| BoardError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, BoardError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| BoardError::Database(format!("Find failed: {}", e)))
    }

    /// Find one document and return only the projected fields
    pub async fn find_one_projected(
        &self,
        filter: Document,
        projection: Document,
    ) -> Result<Option<Document>, BoardError> {
        self.inner
            .clone_with_type::<Document>()
            .find_one(filter)
            .projection(projection)
            .await
            .map_err(|e| BoardError::Database(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>, BoardError> {
        let cursor = self
            .inner
            .find(filter)
            .await
            .map_err(|e| BoardError::Database(format!("Find failed: {}", e)))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| BoardError::Database(format!("Cursor failed: {}", e)))
    }

    /// Insert documents in order
    pub async fn insert_many(&self, items: Vec<T>) -> Result<usize, BoardError> {
        if items.is_empty() {
            return Ok(0);
        }

        let result = self
            .inner
            .insert_many(items)
            .await
            .map_err(|e| BoardError::Database(format!("Insert failed: {}", e)))?;

        Ok(result.inserted_ids.len())
    }

    /// Update one document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, BoardError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| BoardError::Database(format!("Update failed: {}", e)))
    }

    /// Atomic find-and-upsert returning the post-update document.
    ///
    /// A concurrent upsert on the same unique key can lose with a
    /// duplicate key error; the winner's document is returned in that case.
    pub async fn upsert_and_fetch(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<T, BoardError> {
        let result = self
            .inner
            .find_one_and_update(filter.clone(), update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await;

        let found = match result {
            Ok(found) => found,
            Err(e) if is_duplicate_key(&e) => self.find_one(filter).await?,
            Err(e) => return Err(BoardError::Database(format!("Upsert failed: {}", e))),
        };

        found.ok_or_else(|| BoardError::Database("Upsert returned no document".into()))
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}
