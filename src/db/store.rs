//! Store seams for the board
//!
//! [`BoardStore`] covers codes and their embedded entries, [`IdentityStore`]
//! covers identities and their vote ledger. Both are implemented by
//! [`MongoStore`] for production and by
//! [`MemoryStore`](super::memory::MemoryStore) for dev mode and tests.
//!
//! Every primitive is a single atomic document operation. Anything that has
//! to read and then write (the vote floor check) is serialized by the
//! coordinator's per-code lock, not by the store.

use bson::{doc, oid::ObjectId, Bson};
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::debug;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{CodeDoc, EntryDoc, IdentityDoc, CODE_COLLECTION, IDENTITY_COLLECTION};
use crate::types::{BoardError, Result};

/// Codes and their entries
#[async_trait::async_trait]
pub trait BoardStore: Send + Sync {
    /// All codes ordered by display number
    async fn list_codes(&self) -> Result<Vec<CodeDoc>>;

    /// Current vote count of one entry, `None` if the entry is gone
    async fn entry_votes(&self, code_id: &ObjectId, entry_id: &ObjectId) -> Result<Option<i64>>;

    /// Adjust an entry's votes and its code's aggregate in one atomic update.
    ///
    /// Returns `false` when the entry no longer exists.
    async fn apply_vote_delta(
        &self,
        code_id: &ObjectId,
        entry_id: &ObjectId,
        entry_delta: i64,
        total_delta: i64,
    ) -> Result<bool>;

    /// Remove an entry from its code. Returns `false` if nothing was removed.
    async fn pull_entry(&self, code_id: &ObjectId, entry_id: &ObjectId) -> Result<bool>;

    /// Append an entry to a code. Returns `false` if the code does not exist.
    async fn push_entry(&self, code_id: &ObjectId, entry: &EntryDoc) -> Result<bool>;

    /// Create empty codes for every number in `numbers` not yet present.
    ///
    /// Returns how many codes were created.
    async fn insert_missing_codes(&self, numbers: RangeInclusive<i32>) -> Result<usize>;
}

/// Identities and their vote ledger
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fetch the identity for an origin, creating it atomically if absent
    async fn resolve(&self, ip: &str) -> Result<IdentityDoc>;

    /// Add a code to the voted set (idempotent)
    async fn mark_voted(&self, ip: &str, code_id: &ObjectId) -> Result<()>;

    /// Set the submission flag.
    ///
    /// With `only_if_unset` the write is conditional and returns `false` when
    /// the flag was already set.
    async fn mark_submitted(&self, ip: &str, only_if_unset: bool) -> Result<bool>;

    /// Clear the submission flag after a failed post
    async fn unmark_submitted(&self, ip: &str) -> Result<()>;

    /// Empty the voted set and clear the submission flag
    async fn reset(&self, ip: &str) -> Result<()>;
}

/// Run a store call under a deadline
pub async fn with_timeout<T, F>(limit: Duration, op: &'static str, call: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BoardError::Timeout(format!(
            "{} exceeded {}ms",
            op,
            limit.as_millis()
        ))),
    }
}

// ============================================================================
// MongoDB implementation
// ============================================================================

/// MongoDB-backed store over the `codes` and `users` collections
#[derive(Clone)]
pub struct MongoStore {
    codes: MongoCollection<CodeDoc>,
    identities: MongoCollection<IdentityDoc>,
}

impl MongoStore {
    /// Open both collections and apply their indexes
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let codes = mongo.collection::<CodeDoc>(CODE_COLLECTION).await?;
        let identities = mongo.collection::<IdentityDoc>(IDENTITY_COLLECTION).await?;

        Ok(Self { codes, identities })
    }
}

#[async_trait::async_trait]
impl BoardStore for MongoStore {
    async fn list_codes(&self) -> Result<Vec<CodeDoc>> {
        let mut codes = self.codes.find_many(doc! {}).await?;
        codes.sort_by_key(|c| c.number);
        Ok(codes)
    }

    async fn entry_votes(&self, code_id: &ObjectId, entry_id: &ObjectId) -> Result<Option<i64>> {
        let projected = self
            .codes
            .find_one_projected(
                doc! { "_id": code_id, "texts._id": entry_id },
                doc! { "_id": 1, "texts": { "$elemMatch": { "_id": entry_id } } },
            )
            .await?;

        let Some(projected) = projected else {
            return Ok(None);
        };

        let entry = projected
            .get_array("texts")
            .ok()
            .and_then(|texts| texts.first())
            .and_then(Bson::as_document);

        match entry {
            Some(entry) => {
                let entry: EntryDoc = bson::from_document(entry.clone())
                    .map_err(|e| BoardError::Database(format!("Malformed entry: {}", e)))?;
                Ok(Some(entry.votes))
            }
            None => Ok(None),
        }
    }

    async fn apply_vote_delta(
        &self,
        code_id: &ObjectId,
        entry_id: &ObjectId,
        entry_delta: i64,
        total_delta: i64,
    ) -> Result<bool> {
        let result = self
            .codes
            .update_one(
                doc! { "_id": code_id, "texts._id": entry_id },
                doc! { "$inc": { "texts.$.votes": entry_delta, "totalVotes": total_delta } },
            )
            .await?;

        Ok(result.matched_count > 0)
    }

    async fn pull_entry(&self, code_id: &ObjectId, entry_id: &ObjectId) -> Result<bool> {
        let result = self
            .codes
            .update_one(
                doc! { "_id": code_id },
                doc! { "$pull": { "texts": { "_id": entry_id } } },
            )
            .await?;

        Ok(result.modified_count > 0)
    }

    async fn push_entry(&self, code_id: &ObjectId, entry: &EntryDoc) -> Result<bool> {
        let entry = bson::to_bson(entry)
            .map_err(|e| BoardError::Internal(format!("Entry serialization failed: {}", e)))?;

        let result = self
            .codes
            .update_one(doc! { "_id": code_id }, doc! { "$push": { "texts": entry } })
            .await?;

        Ok(result.matched_count > 0)
    }

    async fn insert_missing_codes(&self, numbers: RangeInclusive<i32>) -> Result<usize> {
        let existing = self
            .codes
            .find_many(doc! { "number": { "$gte": *numbers.start(), "$lte": *numbers.end() } })
            .await?;

        let missing: Vec<CodeDoc> = numbers
            .filter(|n| !existing.iter().any(|c| c.number == *n))
            .map(CodeDoc::new)
            .collect();

        debug!(existing = existing.len(), missing = missing.len(), "Populating codes");

        self.codes.insert_many(missing).await
    }
}

#[async_trait::async_trait]
impl IdentityStore for MongoStore {
    async fn resolve(&self, ip: &str) -> Result<IdentityDoc> {
        self.identities
            .upsert_and_fetch(
                doc! { "ip": ip },
                doc! {
                    "$setOnInsert": {
                        "_id": ObjectId::new(),
                        "codes": [],
                        "added": false,
                    }
                },
            )
            .await
    }

    async fn mark_voted(&self, ip: &str, code_id: &ObjectId) -> Result<()> {
        self.identities
            .update_one(doc! { "ip": ip }, doc! { "$addToSet": { "codes": code_id } })
            .await?;
        Ok(())
    }

    async fn mark_submitted(&self, ip: &str, only_if_unset: bool) -> Result<bool> {
        let mut filter = doc! { "ip": ip };
        if only_if_unset {
            filter.insert("added", doc! { "$ne": true });
        }

        let result = self
            .identities
            .update_one(filter, doc! { "$set": { "added": true } })
            .await?;

        Ok(result.matched_count > 0)
    }

    async fn unmark_submitted(&self, ip: &str) -> Result<()> {
        self.identities
            .update_one(doc! { "ip": ip }, doc! { "$set": { "added": false } })
            .await?;
        Ok(())
    }

    async fn reset(&self, ip: &str) -> Result<()> {
        self.identities
            .update_one(
                doc! { "ip": ip },
                doc! { "$set": { "codes": [], "added": false } },
            )
            .await?;
        Ok(())
    }
}
