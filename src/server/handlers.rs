//! Inbound event dispatch
//!
//! Decodes one client frame, runs it against the coordinator and returns the
//! reply meant for the requesting connection only. Accepted mutations reach
//! every observer through the relay instead, so most events reply with
//! nothing.

use bson::oid::ObjectId;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::coordinator::VoteDirection;
use crate::relay::ServerEvent;
use crate::server::http::AppState;
use crate::session::Session;
use crate::types::{BoardError, Result};

/// Message sent from client to server
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    ToggleDevMode(bool),
    Vote {
        code_id: String,
        entry_id: String,
        increment: bool,
    },
    Post {
        code_id: String,
        text: String,
    },
    Delete {
        code_id: String,
        entry_id: String,
    },
    ClearUserData,
    PopulateDb,
    Ping,
}

impl ClientEvent {
    /// Events available only while dev tools are enabled
    pub fn is_dev_tool(&self) -> bool {
        matches!(
            self,
            Self::ToggleDevMode(_) | Self::Delete { .. } | Self::ClearUserData | Self::PopulateDb
        )
    }
}

/// Handle one text frame from a client
pub async fn handle_text_frame(
    state: &Arc<AppState>,
    session: &mut Session,
    text: &str,
) -> Option<ServerEvent> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => handle_client_event(state, session, event).await,
        Err(e) => {
            debug!(connection = %session.connection_id, error = %e, "Malformed client frame");
            Some(ServerEvent::error(format!("Malformed event: {}", e)))
        }
    }
}

/// Run one decoded event and build the requester's reply
pub async fn handle_client_event(
    state: &Arc<AppState>,
    session: &mut Session,
    event: ClientEvent,
) -> Option<ServerEvent> {
    if event.is_dev_tool() && !state.args.allow_dev_tools {
        warn!(connection = %session.connection_id, origin = %session.origin, ?event, "Dev tool refused");
        return Some(ServerEvent::error(
            BoardError::Forbidden("Dev tools are disabled".into()).to_string(),
        ));
    }

    match dispatch(state, session, event).await {
        Ok(reply) => reply,
        Err(e) => reply_for_error(session, e),
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    session: &mut Session,
    event: ClientEvent,
) -> Result<Option<ServerEvent>> {
    let coordinator = &state.coordinator;

    match event {
        ClientEvent::ToggleDevMode(enabled) => {
            session.dev_mode = enabled;
            info!(connection = %session.connection_id, enabled, "Dev mode toggled");
            Ok(None)
        }
        ClientEvent::Vote {
            code_id,
            entry_id,
            increment,
        } => {
            let code_id = ObjectId::parse_str(&code_id)?;
            let entry_id = ObjectId::parse_str(&entry_id)?;
            coordinator
                .apply_vote(
                    session,
                    code_id,
                    entry_id,
                    VoteDirection::from_increment(increment),
                )
                .await?;
            Ok(None)
        }
        ClientEvent::Post { code_id, text } => {
            let code_id = ObjectId::parse_str(&code_id)?;
            coordinator.apply_post(session, code_id, &text).await?;
            Ok(None)
        }
        ClientEvent::Delete { code_id, entry_id } => {
            let code_id = ObjectId::parse_str(&code_id)?;
            let entry_id = ObjectId::parse_str(&entry_id)?;
            coordinator.delete_entry(code_id, entry_id).await?;
            Ok(None)
        }
        ClientEvent::ClearUserData => {
            coordinator.clear_identity(session).await?;
            Ok(Some(coordinator.snapshot(session).await?))
        }
        ClientEvent::PopulateDb => {
            coordinator.populate().await?;
            Ok(Some(coordinator.snapshot(session).await?))
        }
        ClientEvent::Ping => Ok(Some(ServerEvent::Pong)),
    }
}

fn reply_for_error(session: &Session, err: BoardError) -> Option<ServerEvent> {
    if err.is_rejection() {
        debug!(connection = %session.connection_id, reason = %err, "Request refused by policy");
    }

    match err {
        BoardError::AlreadyVoted(code_id) => Some(ServerEvent::AlreadyVoted {
            code_id: code_id.to_hex(),
        }),
        BoardError::AlreadyPosted => Some(ServerEvent::AlreadyAdded),
        // Entries can vanish between a client's view and its action
        BoardError::EntryNotFound { code_id, entry_id } => {
            debug!(code = %code_id, entry = %entry_id, "Dropped request for vanished entry");
            None
        }
        e if e.is_infrastructure() => {
            error!(connection = %session.connection_id, error = %e, "Store call failed");
            Some(ServerEvent::error(e.client_message()))
        }
        e => {
            warn!(connection = %session.connection_id, error = %e, "Request rejected");
            Some(ServerEvent::error(e.client_message()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::db::{CodeDoc, EntryDoc, MemoryStore};
    use clap::Parser;

    struct Fixture {
        state: Arc<AppState>,
        code_id: String,
        entry_id: String,
    }

    fn fixture(extra: &[&str]) -> Fixture {
        let mut argv = vec!["codeboard"];
        argv.extend_from_slice(extra);
        let args = Args::parse_from(argv);

        let mut code = CodeDoc::new(400);
        let entry = EntryDoc::new("ship it".into());
        let (code_id, entry_id) = (code.id.to_hex(), entry.id.to_hex());
        code.texts.push(entry);

        let store = Arc::new(MemoryStore::with_codes(vec![code]));
        let state = AppState::with_stores(args, store.clone(), store, "memory");

        Fixture {
            state: Arc::new(state),
            code_id,
            entry_id,
        }
    }

    fn vote_frame(fx: &Fixture, increment: bool) -> String {
        serde_json::json!({
            "event": "vote",
            "data": {"codeId": fx.code_id, "entryId": fx.entry_id, "increment": increment}
        })
        .to_string()
    }

    #[test]
    fn test_client_event_decoding() {
        let toggle: ClientEvent =
            serde_json::from_str(r#"{"event":"toggleDevMode","data":true}"#).unwrap();
        assert_eq!(toggle, ClientEvent::ToggleDevMode(true));

        let post: ClientEvent =
            serde_json::from_str(r#"{"event":"post","data":{"codeId":"a","text":"b"}}"#).unwrap();
        assert_eq!(
            post,
            ClientEvent::Post {
                code_id: "a".into(),
                text: "b".into()
            }
        );

        let clear: ClientEvent = serde_json::from_str(r#"{"event":"clearUserData"}"#).unwrap();
        assert_eq!(clear, ClientEvent::ClearUserData);
        assert!(clear.is_dev_tool());
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let fx = fixture(&[]);
        let mut session = Session::new("::1");

        let reply = handle_text_frame(&fx.state, &mut session, r#"{"event":"ping"}"#).await;
        assert_eq!(reply, Some(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_malformed_frames_reply_with_error() {
        let fx = fixture(&[]);
        let mut session = Session::new("::1");

        let reply = handle_text_frame(&fx.state, &mut session, "not json").await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));

        let bad_id = r#"{"event":"vote","data":{"codeId":"zz","entryId":"zz","increment":true}}"#;
        let reply = handle_text_frame(&fx.state, &mut session, bad_id).await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_second_vote_replies_already_voted() {
        let fx = fixture(&[]);
        let mut rx = fx.state.hub.subscribe();
        let mut session = Session::new("::1");

        let first = handle_text_frame(&fx.state, &mut session, &vote_frame(&fx, true)).await;
        assert_eq!(first, None);
        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::ReceiveVote { .. }));

        let second = handle_text_frame(&fx.state, &mut session, &vote_frame(&fx, false)).await;
        assert_eq!(
            second,
            Some(ServerEvent::AlreadyVoted {
                code_id: fx.code_id.clone()
            })
        );
    }

    #[tokio::test]
    async fn test_dev_mode_is_connection_local() {
        let fx = fixture(&[]);
        let mut dev = Session::new("::1");
        let mut plain = Session::new("::1");

        handle_text_frame(&fx.state, &mut dev, r#"{"event":"toggleDevMode","data":true}"#).await;
        assert!(dev.dev_mode);
        assert!(!plain.dev_mode);

        // Same identity: dev session votes twice, plain session is then refused
        assert_eq!(handle_text_frame(&fx.state, &mut dev, &vote_frame(&fx, true)).await, None);
        assert_eq!(handle_text_frame(&fx.state, &mut dev, &vote_frame(&fx, true)).await, None);
        let refused = handle_text_frame(&fx.state, &mut plain, &vote_frame(&fx, true)).await;
        assert!(matches!(refused, Some(ServerEvent::AlreadyVoted { .. })));
    }

    #[tokio::test]
    async fn test_dev_tools_refused_when_disabled() {
        let fx = fixture(&["--allow-dev-tools", "false"]);
        let mut session = Session::new("::1");

        let reply =
            handle_text_frame(&fx.state, &mut session, r#"{"event":"toggleDevMode","data":true}"#)
                .await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));
        assert!(!session.dev_mode);

        let reply = handle_text_frame(&fx.state, &mut session, r#"{"event":"populateDb"}"#).await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_second_post_replies_already_added() {
        let fx = fixture(&[]);
        let mut session = Session::new("::1");
        let frame = serde_json::json!({
            "event": "post",
            "data": {"codeId": fx.code_id, "text": "use arenas"}
        })
        .to_string();

        assert_eq!(handle_text_frame(&fx.state, &mut session, &frame).await, None);
        assert_eq!(
            handle_text_frame(&fx.state, &mut session, &frame).await,
            Some(ServerEvent::AlreadyAdded)
        );
    }

    #[tokio::test]
    async fn test_delete_of_vanished_entry_is_silent() {
        let fx = fixture(&[]);
        let mut session = Session::new("::1");
        let frame = serde_json::json!({
            "event": "delete",
            "data": {"codeId": fx.code_id, "entryId": ObjectId::new().to_hex()}
        })
        .to_string();

        assert_eq!(handle_text_frame(&fx.state, &mut session, &frame).await, None);
    }

    #[tokio::test]
    async fn test_clear_user_data_replies_with_snapshot() {
        let fx = fixture(&[]);
        let mut session = Session::new("::1");
        handle_text_frame(&fx.state, &mut session, &vote_frame(&fx, true)).await;

        let reply =
            handle_text_frame(&fx.state, &mut session, r#"{"event":"clearUserData"}"#).await;
        match reply {
            Some(ServerEvent::Init { user, .. }) => {
                assert!(user.codes.is_empty());
                assert!(!user.added);
            }
            other => panic!("expected init, got {:?}", other),
        }
    }
}
