//! In-memory store
//!
//! Used when MongoDB is unavailable in dev mode and as the backing store in
//! tests. Each method holds the write lock for its whole body, which gives us
//! the same single-document atomicity MongoDB provides.

use bson::oid::ObjectId;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::schemas::{CodeDoc, EntryDoc, IdentityDoc};
use super::store::{BoardStore, IdentityStore};
use crate::types::Result;

/// Simple in-memory board and identity store
#[derive(Default)]
pub struct MemoryStore {
    codes: RwLock<Vec<CodeDoc>>,
    identities: RwLock<HashMap<String, IdentityDoc>>,
    /// Mutating calls observed, for asserting "no write happened"
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the given codes
    pub fn with_codes(codes: Vec<CodeDoc>) -> Self {
        Self {
            codes: RwLock::new(codes),
            ..Self::default()
        }
    }

    /// Number of mutating calls made so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Copy of one code, for assertions
    pub async fn code(&self, code_id: &ObjectId) -> Option<CodeDoc> {
        self.codes
            .read()
            .await
            .iter()
            .find(|c| &c.id == code_id)
            .cloned()
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl BoardStore for MemoryStore {
    async fn list_codes(&self) -> Result<Vec<CodeDoc>> {
        let mut codes = self.codes.read().await.clone();
        codes.sort_by_key(|c| c.number);
        Ok(codes)
    }

    async fn entry_votes(&self, code_id: &ObjectId, entry_id: &ObjectId) -> Result<Option<i64>> {
        let codes = self.codes.read().await;
        Ok(codes
            .iter()
            .find(|c| &c.id == code_id)
            .and_then(|c| c.entry(entry_id))
            .map(|e| e.votes))
    }

    async fn apply_vote_delta(
        &self,
        code_id: &ObjectId,
        entry_id: &ObjectId,
        entry_delta: i64,
        total_delta: i64,
    ) -> Result<bool> {
        self.record_write();
        let mut codes = self.codes.write().await;

        let Some(code) = codes.iter_mut().find(|c| &c.id == code_id) else {
            return Ok(false);
        };
        let Some(entry) = code.texts.iter_mut().find(|e| &e.id == entry_id) else {
            return Ok(false);
        };

        entry.votes += entry_delta;
        code.total_votes += total_delta;
        Ok(true)
    }

    async fn pull_entry(&self, code_id: &ObjectId, entry_id: &ObjectId) -> Result<bool> {
        self.record_write();
        let mut codes = self.codes.write().await;

        let Some(code) = codes.iter_mut().find(|c| &c.id == code_id) else {
            return Ok(false);
        };

        let before = code.texts.len();
        code.texts.retain(|e| &e.id != entry_id);
        Ok(code.texts.len() < before)
    }

    async fn push_entry(&self, code_id: &ObjectId, entry: &EntryDoc) -> Result<bool> {
        self.record_write();
        let mut codes = self.codes.write().await;

        match codes.iter_mut().find(|c| &c.id == code_id) {
            Some(code) => {
                code.texts.push(entry.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_missing_codes(&self, numbers: RangeInclusive<i32>) -> Result<usize> {
        self.record_write();
        let mut codes = self.codes.write().await;

        let mut created = 0;
        for number in numbers {
            if !codes.iter().any(|c| c.number == number) {
                codes.push(CodeDoc::new(number));
                created += 1;
            }
        }
        Ok(created)
    }
}

#[async_trait::async_trait]
impl IdentityStore for MemoryStore {
    async fn resolve(&self, ip: &str) -> Result<IdentityDoc> {
        if let Some(identity) = self.identities.read().await.get(ip) {
            return Ok(identity.clone());
        }

        // Re-check under the write lock: first writer wins
        let mut identities = self.identities.write().await;
        let identity = identities
            .entry(ip.to_string())
            .or_insert_with(|| IdentityDoc::new(ip));
        Ok(identity.clone())
    }

    async fn mark_voted(&self, ip: &str, code_id: &ObjectId) -> Result<()> {
        self.record_write();
        if let Some(identity) = self.identities.write().await.get_mut(ip) {
            if !identity.codes.contains(code_id) {
                identity.codes.push(*code_id);
            }
        }
        Ok(())
    }

    async fn mark_submitted(&self, ip: &str, only_if_unset: bool) -> Result<bool> {
        self.record_write();
        match self.identities.write().await.get_mut(ip) {
            Some(identity) if only_if_unset && identity.added => Ok(false),
            Some(identity) => {
                identity.added = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unmark_submitted(&self, ip: &str) -> Result<()> {
        self.record_write();
        if let Some(identity) = self.identities.write().await.get_mut(ip) {
            identity.added = false;
        }
        Ok(())
    }

    async fn reset(&self, ip: &str) -> Result<()> {
        self.record_write();
        if let Some(identity) = self.identities.write().await.get_mut(ip) {
            identity.codes.clear();
            identity.added = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resolve_is_stable_per_ip() {
        let store = MemoryStore::new();

        let first = store.resolve("10.0.0.1").await.unwrap();
        let again = store.resolve("10.0.0.1").await.unwrap();
        let other = store.resolve("10.0.0.2").await.unwrap();

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, other.id);
        assert!(first.codes.is_empty());
        assert!(!first.added);
    }

    #[tokio::test]
    async fn test_concurrent_first_contact_creates_one_identity() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.resolve("192.168.1.9").await.unwrap().id })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_voted_is_idempotent() {
        let store = MemoryStore::new();
        let code = ObjectId::new();
        store.resolve("::1").await.unwrap();

        store.mark_voted("::1", &code).await.unwrap();
        store.mark_voted("::1", &code).await.unwrap();

        let identity = store.resolve("::1").await.unwrap();
        assert_eq!(identity.codes, vec![code]);
    }

    #[tokio::test]
    async fn test_conditional_submission_claim() {
        let store = MemoryStore::new();
        store.resolve("::1").await.unwrap();

        assert!(store.mark_submitted("::1", true).await.unwrap());
        assert!(!store.mark_submitted("::1", true).await.unwrap());
        // Unconditional claim always succeeds
        assert!(store.mark_submitted("::1", false).await.unwrap());

        tokio_test::assert_ok!(store.unmark_submitted("::1").await);
        assert!(store.mark_submitted("::1", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_vote_delta_on_missing_entry() {
        let code = CodeDoc::new(400);
        let code_id = code.id;
        let store = MemoryStore::with_codes(vec![code]);

        let applied = store
            .apply_vote_delta(&code_id, &ObjectId::new(), 1, 1)
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(store.code(&code_id).await.unwrap().total_votes, 0);
    }

    #[tokio::test]
    async fn test_insert_missing_codes_skips_existing() {
        let store = MemoryStore::with_codes(vec![CodeDoc::new(401)]);

        assert_eq!(store.insert_missing_codes(400..=402).await.unwrap(), 2);
        assert_eq!(store.insert_missing_codes(400..=402).await.unwrap(), 0);

        let numbers: Vec<i32> = store
            .list_codes()
            .await
            .unwrap()
            .iter()
            .map(|c| c.number)
            .collect();
        assert_eq!(numbers, vec![400, 401, 402]);
    }
}
