//! Database layer for codeboard
//!
//! MongoDB storage for codes and identities, plus an in-memory fallback.

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoCollection};
pub use schemas::{CodeDoc, EntryDoc, IdentityDoc};
pub use store::{with_timeout, BoardStore, IdentityStore, MongoStore};
