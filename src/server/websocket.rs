//! WebSocket session loop
//!
//! ## Lifecycle
//!
//! 1. Upgrade, refused with 403 when the `Origin` header is not allowed
//! 2. Subscribe to the relay, then send `init`
//! 3. Relay deltas and answer client events until either side closes
//!
//! An observer that falls behind the relay gets a fresh `init` instead of the
//! deltas it missed.

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::identity::origin_address;
use crate::relay::ServerEvent;
use crate::server::handlers;
use crate::server::http::AppState;
use crate::session::Session;
use crate::types::{BoardError, Result};

type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Upgrade a board connection
pub async fn handle_board_ws(
    state: Arc<AppState>,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let request_origin = req
        .headers()
        .get(hyper::header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if !state.args.is_allowed_origin(request_origin) {
        warn!(peer = %peer, origin = ?request_origin, "WebSocket origin refused");
        return Response::builder()
            .status(StatusCode::FORBIDDEN)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(r#"{"error": "Origin not allowed"}"#)))
            .unwrap();
    }

    let origin = origin_address(req.headers(), peer);

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok((resp, ws)) => (resp, ws),
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("WebSocket upgrade failed")))
                .unwrap();
        }
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                let session = Session::new(origin);
                if let Err(e) = handle_board_connection(ws, state, session).await {
                    warn!("Board WebSocket error: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

async fn handle_board_connection(
    ws: HyperWebSocket,
    state: Arc<AppState>,
    mut session: Session,
) -> Result<()> {
    let (mut sender, mut receiver) = ws.split();

    // Subscribe before the snapshot so no delta falls between the two
    let mut rx = state.hub.subscribe();

    info!(
        connection = %session.connection_id,
        origin = %session.origin,
        observers = state.hub.observer_count(),
        "Board client connected"
    );

    let snapshot = match state.coordinator.snapshot(&session).await {
        Ok(event) => event,
        Err(e) => {
            error!(connection = %session.connection_id, error = %e, "Failed to build snapshot");
            send_event(&mut sender, &ServerEvent::error(e.client_message())).await?;
            return Err(e);
        }
    };
    send_event(&mut sender, &snapshot).await?;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(connection = %session.connection_id, skipped, "Observer lagged, resending snapshot");
                        match state.coordinator.snapshot(&session).await {
                            Ok(event) => send_event(&mut sender, &event).await?,
                            Err(e) => {
                                error!(connection = %session.connection_id, error = %e, "Failed to rebuild snapshot");
                                break;
                            }
                        }
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        debug!(connection = %session.connection_id, "Received: {}", text);
                        if let Some(reply) = handlers::handle_text_frame(&state, &mut session, &text).await {
                            send_event(&mut sender, &reply).await?;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!(connection = %session.connection_id, "Board client disconnected");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
        }
    }

    info!(
        connection = %session.connection_id,
        duration_secs = session.connected_at.elapsed().as_secs(),
        "Board connection closed"
    );
    Ok(())
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> Result<()>
where
    S: Sink<WsMessage> + Unpin,
    BoardError: From<S::Error>,
{
    let json = serde_json::to_string(event)?;
    sender.send(WsMessage::Text(json)).await?;
    Ok(())
}
