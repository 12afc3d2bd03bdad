//! Configuration for codeboard
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;
use uuid::Uuid;

use crate::types::BoardError;

/// codeboard - realtime voting board server
#[derive(Parser, Debug, Clone)]
#[command(name = "codeboard")]
#[command(about = "Realtime collaborative voting board over WebSocket")]
pub struct Args {
    /// Unique node identifier for this server instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Development mode (continue with the in-memory store if MongoDB is down)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "tsc")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Upper bound for every store call in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "5000")]
    pub request_timeout_ms: u64,

    /// Accept toggleDevMode, delete, clearUserData and populateDb events
    #[arg(long, env = "ALLOW_DEV_TOOLS", default_value = "true", action = clap::ArgAction::Set)]
    pub allow_dev_tools: bool,

    /// Only accept WebSocket upgrades carrying this Origin header
    #[arg(long, env = "ALLOWED_ORIGIN")]
    pub allowed_origin: Option<String>,

    /// First code number created by populateDb
    #[arg(long, env = "POPULATE_FROM", default_value = "400")]
    pub populate_from: i32,

    /// Last code number (inclusive) created by populateDb
    #[arg(long, env = "POPULATE_TO", default_value = "499")]
    pub populate_to: i32,

    /// Maximum entry text length in characters
    #[arg(long, env = "MAX_TEXT_LEN", default_value = "280")]
    pub max_text_len: usize,

    /// Broadcast channel capacity per observer before it lags
    #[arg(long, env = "BROADCAST_CAPACITY", default_value = "256")]
    pub broadcast_capacity: usize,
}

impl Args {
    /// Store call timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Code numbers created by populateDb
    pub fn populate_range(&self) -> RangeInclusive<i32> {
        self.populate_from..=self.populate_to
    }

    /// Check whether an upgrade's Origin header is acceptable
    pub fn is_allowed_origin(&self, origin: Option<&str>) -> bool {
        match &self.allowed_origin {
            None => true,
            Some(allowed) => origin == Some(allowed.as_str()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), BoardError> {
        if self.populate_from > self.populate_to {
            return Err(BoardError::Config(
                "POPULATE_FROM must be less than or equal to POPULATE_TO".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(BoardError::Config(
                "REQUEST_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        if self.max_text_len == 0 {
            return Err(BoardError::Config(
                "MAX_TEXT_LEN must be greater than zero".to_string(),
            ));
        }

        if self.broadcast_capacity == 0 {
            return Err(BoardError::Config(
                "BROADCAST_CAPACITY must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["codeboard"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = args(&[]);
        assert!(args.validate().is_ok());
        assert_eq!(args.populate_range(), 400..=499);
        assert!(args.allow_dev_tools);
        assert!(!args.dev_mode);
    }

    #[test]
    fn test_inverted_populate_range_rejected() {
        let args = args(&["--populate-from", "500", "--populate-to", "400"]);
        assert!(matches!(args.validate(), Err(BoardError::Config(_))));
    }

    #[test]
    fn test_origin_restriction() {
        let open = args(&[]);
        assert!(open.is_allowed_origin(None));
        assert!(open.is_allowed_origin(Some("http://evil.example")));

        let locked = args(&["--allowed-origin", "http://localhost:8080"]);
        assert!(locked.is_allowed_origin(Some("http://localhost:8080")));
        assert!(!locked.is_allowed_origin(Some("http://evil.example")));
        assert!(!locked.is_allowed_origin(None));
    }

    #[test]
    fn test_dev_tools_can_be_disabled() {
        let args = args(&["--allow-dev-tools", "false"]);
        assert!(!args.allow_dev_tools);
    }
}
