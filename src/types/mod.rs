//! Shared types

mod error;

pub use error::{BoardError, Result};
