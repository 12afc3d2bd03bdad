//! Vote coordinator
//!
//! Applies votes, posts and deletions against the board. Every read-then-write
//! on a code runs under that code's lock, so the floor check and the update
//! that follows it can never interleave with another request for the same
//! code. Accepted mutations are handed to the [`BoardHub`] only after every
//! store write for them has succeeded.

use bson::oid::ObjectId;
use dashmap::DashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::db::{with_timeout, BoardStore, EntryDoc, IdentityStore};
use crate::identity::IdentityLedger;
use crate::relay::{BoardHub, ServerEvent};
use crate::session::Session;
use crate::types::{BoardError, Result};

/// A downvote on an entry at or below this count removes it
pub const DELETE_FLOOR: i64 = -5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn from_increment(increment: bool) -> Self {
        if increment {
            Self::Up
        } else {
            Self::Down
        }
    }

    pub fn is_up(self) -> bool {
        self == Self::Up
    }
}

/// What a vote does to the board, given the entry's current count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotePlan {
    Delete,
    Apply {
        entry_delta: i64,
        total_delta: i64,
        ignore_total_votes: bool,
    },
}

/// Decide the effect of one vote.
///
/// Downvotes at or below [`DELETE_FLOOR`] delete. Otherwise the entry moves by
/// one and the aggregate follows, except that a downvote on an entry that is
/// already at or below zero leaves the aggregate alone.
pub fn plan_vote(current: i64, direction: VoteDirection) -> VotePlan {
    let down = direction == VoteDirection::Down;
    if down && current <= DELETE_FLOOR {
        return VotePlan::Delete;
    }

    let (entry_delta, total_delta) = match direction {
        VoteDirection::Up => (1, 1),
        VoteDirection::Down if current <= 0 => (-1, 0),
        VoteDirection::Down => (-1, -1),
    };

    VotePlan::Apply {
        entry_delta,
        total_delta,
        ignore_total_votes: (current == 0 && down) || current <= -1,
    }
}

/// Result of an accepted vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Applied { votes: i64, ignore_total_votes: bool },
    Deleted,
}

// ============================================================================
// Per-code locks
// ============================================================================

/// Table of per-code mutexes, created on demand
#[derive(Default)]
pub struct CodeLocks {
    locks: DashMap<ObjectId, Arc<Mutex<()>>>,
}

impl CodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one code
    pub async fn acquire(&self, code_id: ObjectId) -> CodeLockGuard<'_> {
        let mutex = self.locks.entry(code_id).or_default().clone();
        let guard = mutex.lock_owned().await;
        CodeLockGuard {
            locks: self,
            code_id,
            guard: Some(guard),
        }
    }

    /// Codes with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of one critical section on a code
pub struct CodeLockGuard<'a> {
    locks: &'a CodeLocks,
    code_id: ObjectId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CodeLockGuard<'_> {
    fn drop(&mut self) {
        // Release first so the only remaining reference is the table's
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.code_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

// ============================================================================
// Coordinator
// ============================================================================

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub request_timeout: Duration,
    pub max_text_len: usize,
    pub populate_range: RangeInclusive<i32>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_text_len: 280,
            populate_range: 400..=499,
        }
    }
}

impl From<&Args> for CoordinatorConfig {
    fn from(args: &Args) -> Self {
        Self {
            request_timeout: args.request_timeout(),
            max_text_len: args.max_text_len,
            populate_range: args.populate_range(),
        }
    }
}

#[derive(Clone)]
pub struct Coordinator {
    board: Arc<dyn BoardStore>,
    ledger: IdentityLedger,
    hub: Arc<BoardHub>,
    locks: Arc<CodeLocks>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        board: Arc<dyn BoardStore>,
        identities: Arc<dyn IdentityStore>,
        hub: Arc<BoardHub>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            board,
            ledger: IdentityLedger::new(identities, config.request_timeout),
            hub,
            locks: Arc::new(CodeLocks::new()),
            config,
        }
    }

    pub fn ledger(&self) -> &IdentityLedger {
        &self.ledger
    }

    pub fn hub(&self) -> &Arc<BoardHub> {
        &self.hub
    }

    /// Apply one vote from the session's identity.
    ///
    /// Returns `AlreadyVoted` when the identity has spent its vote on this
    /// code, and `EntryNotFound` when the entry is gone. Neither is broadcast.
    pub async fn apply_vote(
        &self,
        session: &Session,
        code_id: ObjectId,
        entry_id: ObjectId,
        direction: VoteDirection,
    ) -> Result<VoteOutcome> {
        let _lock = self.locks.acquire(code_id).await;

        // Resolved under the lock so two votes from one identity are ordered
        let identity = self.ledger.resolve(&session.origin).await?;
        if session.enforces_limits() && identity.has_voted(&code_id) {
            return Err(BoardError::AlreadyVoted(code_id));
        }

        let current = self
            .timed("fetch entry votes", self.board.entry_votes(&code_id, &entry_id))
            .await?
            .ok_or(BoardError::EntryNotFound { code_id, entry_id })?;

        match plan_vote(current, direction) {
            VotePlan::Delete => {
                let removed = self
                    .timed("pull entry", self.board.pull_entry(&code_id, &entry_id))
                    .await?;
                if !removed {
                    return Err(BoardError::EntryNotFound { code_id, entry_id });
                }

                info!(code = %code_id, entry = %entry_id, votes = current, "Entry removed at vote floor");
                self.hub.broadcast_delete(&code_id, &entry_id);
                Ok(VoteOutcome::Deleted)
            }
            VotePlan::Apply {
                entry_delta,
                total_delta,
                ignore_total_votes,
            } => {
                let applied = self
                    .timed(
                        "apply vote",
                        self.board
                            .apply_vote_delta(&code_id, &entry_id, entry_delta, total_delta),
                    )
                    .await?;
                if !applied {
                    return Err(BoardError::EntryNotFound { code_id, entry_id });
                }

                if let Err(e) = self.ledger.mark_voted(&session.origin, &code_id).await {
                    self.revert_vote(&code_id, &entry_id, entry_delta, total_delta)
                        .await;
                    return Err(e);
                }

                debug!(
                    identity = %identity.id,
                    code = %code_id,
                    entry = %entry_id,
                    from = current,
                    to = current + entry_delta,
                    ignore_total_votes,
                    "Vote applied"
                );
                self.hub.broadcast_vote(
                    &code_id,
                    &entry_id,
                    direction.is_up(),
                    ignore_total_votes,
                    &identity.id,
                );
                Ok(VoteOutcome::Applied {
                    votes: current + entry_delta,
                    ignore_total_votes,
                })
            }
        }
    }

    async fn revert_vote(
        &self,
        code_id: &ObjectId,
        entry_id: &ObjectId,
        entry_delta: i64,
        total_delta: i64,
    ) {
        let revert = self.timed(
            "revert vote",
            self.board
                .apply_vote_delta(code_id, entry_id, -entry_delta, -total_delta),
        );
        match revert.await {
            Ok(_) => warn!(code = %code_id, entry = %entry_id, "Vote reverted after ledger failure"),
            Err(e) => error!(
                code = %code_id,
                entry = %entry_id,
                error = %e,
                "Failed to revert vote, counts may be off by one"
            ),
        }
    }

    /// Append a new entry authored by the session's identity
    pub async fn apply_post(
        &self,
        session: &Session,
        code_id: ObjectId,
        text: &str,
    ) -> Result<EntryDoc> {
        let identity = self.ledger.resolve(&session.origin).await?;
        if session.enforces_limits() && identity.added {
            return Err(BoardError::AlreadyPosted);
        }

        self.validate_text(text)?;

        let claimed = self
            .ledger
            .mark_submitted(&session.origin, session.enforces_limits())
            .await?;
        if !claimed {
            return Err(BoardError::AlreadyPosted);
        }

        let entry = EntryDoc::new(text.to_string());
        let pushed = self
            .timed("push entry", self.board.push_entry(&code_id, &entry))
            .await;

        match pushed {
            Ok(true) => {}
            Ok(false) => {
                self.release_claim(session, identity.added).await;
                return Err(BoardError::CodeNotFound(code_id));
            }
            Err(e) => {
                self.release_claim(session, identity.added).await;
                return Err(e);
            }
        }

        info!(identity = %identity.id, code = %code_id, entry = %entry.id, "Entry posted");
        self.hub.broadcast_post(&code_id, &entry, &identity.id);
        Ok(entry)
    }

    async fn release_claim(&self, session: &Session, was_added: bool) {
        if was_added {
            return;
        }
        if let Err(e) = self.ledger.unmark_submitted(&session.origin).await {
            error!(origin = %session.origin, error = %e, "Failed to release submission flag");
        }
    }

    /// Checks the trimmed text; the entry keeps the text as given
    fn validate_text(&self, text: &str) -> Result<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(BoardError::BadRequest("Entry text is empty".into()));
        }
        let len = trimmed.chars().count();
        if len > self.config.max_text_len {
            return Err(BoardError::BadRequest(format!(
                "Entry text is {} characters, limit is {}",
                len, self.config.max_text_len
            )));
        }
        Ok(())
    }

    /// Remove an entry regardless of its votes
    pub async fn delete_entry(&self, code_id: ObjectId, entry_id: ObjectId) -> Result<()> {
        let _lock = self.locks.acquire(code_id).await;

        let removed = self
            .timed("pull entry", self.board.pull_entry(&code_id, &entry_id))
            .await?;
        if !removed {
            return Err(BoardError::EntryNotFound { code_id, entry_id });
        }

        info!(code = %code_id, entry = %entry_id, "Entry deleted");
        self.hub.broadcast_delete(&code_id, &entry_id);
        Ok(())
    }

    /// Forget the session identity's votes and post
    pub async fn clear_identity(&self, session: &Session) -> Result<()> {
        self.ledger.reset(&session.origin).await?;
        info!(origin = %session.origin, "Identity ledger cleared");
        Ok(())
    }

    /// Create the configured range of empty codes. Existing numbers are kept.
    pub async fn populate(&self) -> Result<usize> {
        let range = self.config.populate_range.clone();
        let created = self
            .timed(
                "populate codes",
                self.board.insert_missing_codes(range.clone()),
            )
            .await?;

        info!(
            from = range.start(),
            to = range.end(),
            created,
            "Populated codes"
        );
        Ok(created)
    }

    /// Full board plus the session identity's own ledger
    pub async fn snapshot(&self, session: &Session) -> Result<ServerEvent> {
        let identity = self.ledger.resolve(&session.origin).await?;
        let codes = self.timed("list codes", self.board.list_codes()).await?;
        Ok(ServerEvent::init(&codes, &identity))
    }

    async fn timed<T, F>(&self, op: &'static str, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        with_timeout(self.config.request_timeout, op, call).await
    }
}
