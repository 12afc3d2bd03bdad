//! Database schemas for codeboard
//!
//! Defines MongoDB document structures for codes, their entries, and identities.

mod code;
mod identity;

pub use code::{CodeDoc, EntryDoc, CODE_COLLECTION};
pub use identity::{IdentityDoc, IDENTITY_COLLECTION};
