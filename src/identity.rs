//! Identity resolution and the vote ledger
//!
//! An identity is keyed by the connection's origin address. It is created on
//! first contact and then carries the set of codes already voted on and the
//! single-submission flag. All calls go through the configured store timeout.

use bson::oid::ObjectId;
use hyper::HeaderMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::db::{with_timeout, IdentityDoc, IdentityStore};
use crate::types::Result;

/// Header set by the reverse proxy with the client's address
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Origin address for a connection: proxy header first, then the TCP peer
pub fn origin_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_canonical().to_string())
}

/// Resolves identities and records their ledger
#[derive(Clone)]
pub struct IdentityLedger {
    store: Arc<dyn IdentityStore>,
    timeout: Duration,
}

impl IdentityLedger {
    pub fn new(store: Arc<dyn IdentityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Fetch or atomically create the identity for `origin`
    pub async fn resolve(&self, origin: &str) -> Result<IdentityDoc> {
        let identity = with_timeout(self.timeout, "resolve identity", self.store.resolve(origin)).await?;
        debug!(origin = %origin, identity = %identity.id, "Resolved identity");
        Ok(identity)
    }

    pub async fn mark_voted(&self, origin: &str, code_id: &ObjectId) -> Result<()> {
        with_timeout(self.timeout, "mark voted", self.store.mark_voted(origin, code_id)).await
    }

    /// Claim the one post. Returns `false` if it was already claimed and
    /// `only_if_unset` is set.
    pub async fn mark_submitted(&self, origin: &str, only_if_unset: bool) -> Result<bool> {
        with_timeout(
            self.timeout,
            "mark submitted",
            self.store.mark_submitted(origin, only_if_unset),
        )
        .await
    }

    pub async fn unmark_submitted(&self, origin: &str) -> Result<()> {
        with_timeout(self.timeout, "unmark submitted", self.store.unmark_submitted(origin)).await
    }

    /// Clear the voted set and the submission flag
    pub async fn reset(&self, origin: &str) -> Result<()> {
        with_timeout(self.timeout, "reset identity", self.store.reset(origin)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use hyper::header::HeaderValue;

    fn peer() -> SocketAddr {
        "127.0.0.1:51000".parse().unwrap()
    }

    #[test]
    fn test_origin_prefers_real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("198.51.100.23"));
        assert_eq!(origin_address(&headers, peer()), "198.51.100.23");
    }

    #[test]
    fn test_origin_falls_back_to_peer() {
        let headers = HeaderMap::new();
        assert_eq!(origin_address(&headers, peer()), "127.0.0.1");

        let mut blank = HeaderMap::new();
        blank.insert(REAL_IP_HEADER, HeaderValue::from_static("  "));
        assert_eq!(origin_address(&blank, peer()), "127.0.0.1");
    }

    #[test]
    fn test_origin_unmaps_ipv4_in_ipv6() {
        let headers = HeaderMap::new();
        let mapped: SocketAddr = "[::ffff:10.1.2.3]:4000".parse().unwrap();
        assert_eq!(origin_address(&headers, mapped), "10.1.2.3");
    }

    #[tokio::test]
    async fn test_ledger_round_trip() {
        let ledger = IdentityLedger::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        let code = ObjectId::new();

        let identity = ledger.resolve("::1").await.unwrap();
        assert!(!identity.has_voted(&code));

        ledger.mark_voted("::1", &code).await.unwrap();
        assert!(ledger.mark_submitted("::1", true).await.unwrap());

        let identity = ledger.resolve("::1").await.unwrap();
        assert!(identity.has_voted(&code));
        assert!(identity.added);

        ledger.reset("::1").await.unwrap();
        let identity = ledger.resolve("::1").await.unwrap();
        assert!(identity.codes.is_empty());
        assert!(!identity.added);
    }
}
