//! Per-connection session state
//!
//! One `Session` lives for the duration of a WebSocket connection and is
//! passed by reference into every handler. Nothing in it is shared between
//! connections, so toggling dev mode on one tab never affects another.

use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Session {
    /// Connection id for log correlation
    pub connection_id: Uuid,
    /// Origin address the identity is derived from
    pub origin: String,
    /// Bypass one-vote-per-code and one-post checks for this connection only
    pub dev_mode: bool,
    pub connected_at: Instant,
}

impl Session {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            origin: origin.into(),
            dev_mode: false,
            connected_at: Instant::now(),
        }
    }

    /// Whether the dedup checks apply to this connection's requests
    pub fn enforces_limits(&self) -> bool {
        !self.dev_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_off_by_default() {
        let session = Session::new("::1");
        assert!(session.enforces_limits());
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut first = Session::new("::1");
        let second = Session::new("::1");

        first.dev_mode = true;
        assert!(!first.enforces_limits());
        assert!(second.enforces_limits());
        assert_ne!(first.connection_id, second.connection_id);
    }
}
