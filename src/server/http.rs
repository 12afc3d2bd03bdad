//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo. The board itself lives on the WebSocket
//! upgrade at `/` or `/ws`; plain HTTP only serves the health probe.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::db::{BoardStore, IdentityStore, MemoryStore, MongoClient, MongoStore};
use crate::relay::BoardHub;
use crate::server::websocket;
use crate::types::BoardError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub coordinator: Coordinator,
    /// Broadcast relay shared with the coordinator
    pub hub: Arc<BoardHub>,
    /// Which backend the stores run on, for the health probe
    pub storage: &'static str,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build state over explicit stores
    pub fn with_stores(
        args: Args,
        board: Arc<dyn BoardStore>,
        identities: Arc<dyn IdentityStore>,
        storage: &'static str,
    ) -> Self {
        let hub = Arc::new(BoardHub::new(args.broadcast_capacity));
        let coordinator = Coordinator::new(
            board,
            identities,
            Arc::clone(&hub),
            CoordinatorConfig::from(&args),
        );

        Self {
            args,
            coordinator,
            hub,
            storage,
            started_at: Utc::now(),
        }
    }

    /// Build state backed by MongoDB
    pub async fn with_mongo(args: Args, mongo: &MongoClient) -> Result<Self, BoardError> {
        let store = Arc::new(MongoStore::new(mongo).await?);
        Ok(Self::with_stores(args, store.clone(), store, "mongodb"))
    }

    /// Build state backed by the in-memory store
    pub fn in_memory(args: Args) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(args, store.clone(), store, "memory")
    }
}

pub async fn run(state: Arc<AppState>) -> Result<(), BoardError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "codeboard listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - in-memory fallback allowed");
    }
    if state.args.allow_dev_tools {
        warn!("Dev tools enabled - toggleDevMode, delete, clearUserData and populateDb are accepted");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/" | "/ws") if hyper_tungstenite::is_upgrade_request(&req) => {
            to_boxed(websocket::handle_board_ws(Arc::clone(&state), req, addr).await)
        }

        (Method::GET, "/" | "/ws") => {
            to_boxed(bad_request_response("WebSocket upgrade required"))
        }

        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(health_check(&state))
        }

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response(&state.args)),

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub version: &'static str,
    pub storage: &'static str,
    pub observers: usize,
    pub uptime_secs: i64,
}

pub fn build_health_response(state: &AppState) -> HealthResponse {
    HealthResponse {
        healthy: true,
        node_id: state.args.node_id.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        storage: state.storage,
        observers: state.hub.observer_count(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    }
}

/// Liveness probe
fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(&build_health_response(state))
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response(args: &Args) -> Response<Full<Bytes>> {
    let allow_origin = args.allowed_origin.as_deref().unwrap_or("*");

    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", allow_origin)
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "Use a WebSocket connection to / or /ws"
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Bad request response
fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Bad Request",
        "message": message
    });

    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_health_reports_observers() {
        let state = AppState::in_memory(Args::parse_from(["codeboard"]));
        let _rx = state.hub.subscribe();

        let health = build_health_response(&state);
        assert!(health.healthy);
        assert_eq!(health.storage, "memory");
        assert_eq!(health.observers, 1);

        let json = serde_json::to_value(&health).unwrap();
        assert!(json.get("uptimeSecs").is_some());
    }

    #[test]
    fn test_preflight_uses_allowed_origin() {
        let args = Args::parse_from(["codeboard", "--allowed-origin", "http://localhost:8080"]);
        let response = preflight_response(&args);
        assert_eq!(
            response.headers()["Access-Control-Allow-Origin"],
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_not_found_is_json() {
        let response = not_found_response("/nope");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["Content-Type"], "application/json");
    }
}
