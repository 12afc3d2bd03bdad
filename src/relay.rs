//! Broadcast relay and wire events
//!
//! ## Protocol
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.
//! Ids are 24-character hex strings.
//!
//! Broadcast to every observer (the originator included):
//! - `receiveVote` - an accepted vote, with `ignoreTotalVotes` telling
//!   observers whether the aggregate moved
//! - `receivePost` - a new entry
//! - `receiveDelete` - an entry left its code
//!
//! Sent only to the requesting connection:
//! - `init` - full snapshot plus the caller's own ledger
//! - `alreadyVoted`, `alreadyAdded` - policy rejections
//! - `error` - malformed request or failed store call
//! - `pong`
//!
//! ```json
//! {"event": "receiveVote", "data": {"codeId": "65a1...", "entryId": "65a2...",
//!  "increment": false, "ignoreTotalVotes": true, "voterId": "65a3..."}}
//! ```

use bson::oid::ObjectId;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::db::{CodeDoc, EntryDoc, IdentityDoc};

/// Message sent from server to client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Full state after connecting
    Init {
        codes: Vec<CodeView>,
        user: IdentityView,
    },
    ReceiveVote {
        code_id: String,
        entry_id: String,
        increment: bool,
        ignore_total_votes: bool,
        voter_id: String,
    },
    ReceivePost {
        code_id: String,
        entry: EntryView,
        voter_id: String,
    },
    ReceiveDelete {
        code_id: String,
        entry_id: String,
    },
    AlreadyVoted {
        code_id: String,
    },
    AlreadyAdded,
    Error {
        message: String,
    },
    Pong,
}

impl ServerEvent {
    /// Snapshot event for one identity
    pub fn init(codes: &[CodeDoc], identity: &IdentityDoc) -> Self {
        Self::Init {
            codes: codes.iter().map(CodeView::from).collect(),
            user: IdentityView::from(identity),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Code as clients see it
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeView {
    #[serde(rename = "_id")]
    pub id: String,
    pub number: i32,
    pub total_votes: i64,
    pub texts: Vec<EntryView>,
}

impl From<&CodeDoc> for CodeView {
    fn from(code: &CodeDoc) -> Self {
        Self {
            id: code.id.to_hex(),
            number: code.number,
            total_votes: code.total_votes,
            texts: code.texts.iter().map(EntryView::from).collect(),
        }
    }
}

/// Entry as clients see it
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntryView {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: String,
    pub votes: i64,
}

impl From<&EntryDoc> for EntryView {
    fn from(entry: &EntryDoc) -> Self {
        Self {
            id: entry.id.to_hex(),
            text: entry.text.clone(),
            votes: entry.votes,
        }
    }
}

/// The caller's own identity; the origin address is never sent back
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdentityView {
    #[serde(rename = "_id")]
    pub id: String,
    pub codes: Vec<String>,
    pub added: bool,
}

impl From<&IdentityDoc> for IdentityView {
    fn from(identity: &IdentityDoc) -> Self {
        Self {
            id: identity.id.to_hex(),
            codes: identity.codes.iter().map(|c| c.to_hex()).collect(),
            added: identity.added,
        }
    }
}

// ============================================================================
// Board Hub
// ============================================================================

/// Hub for fanning accepted mutations out to every connected observer
pub struct BoardHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl BoardHub {
    /// Create a hub; observers further than `capacity` events behind lag
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register an observer
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Number of currently subscribed observers
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Broadcast a message to all connected observers
    pub fn broadcast(&self, event: ServerEvent) {
        // No subscribers is not an error
        let delivered = self.sender.send(event).unwrap_or(0);
        trace!(delivered, "Broadcast event");
    }

    pub fn broadcast_vote(
        &self,
        code_id: &ObjectId,
        entry_id: &ObjectId,
        increment: bool,
        ignore_total_votes: bool,
        voter_id: &ObjectId,
    ) {
        self.broadcast(ServerEvent::ReceiveVote {
            code_id: code_id.to_hex(),
            entry_id: entry_id.to_hex(),
            increment,
            ignore_total_votes,
            voter_id: voter_id.to_hex(),
        });
    }

    pub fn broadcast_post(&self, code_id: &ObjectId, entry: &EntryDoc, voter_id: &ObjectId) {
        self.broadcast(ServerEvent::ReceivePost {
            code_id: code_id.to_hex(),
            entry: EntryView::from(entry),
            voter_id: voter_id.to_hex(),
        });
    }

    pub fn broadcast_delete(&self, code_id: &ObjectId, entry_id: &ObjectId) {
        self.broadcast(ServerEvent::ReceiveDelete {
            code_id: code_id.to_hex(),
            entry_id: entry_id.to_hex(),
        });
    }
}
