//! Server layer: HTTP listener, WebSocket sessions and event dispatch

pub mod handlers;
pub mod http;
pub mod websocket;

pub use handlers::{handle_client_event, handle_text_frame, ClientEvent};
pub use http::{run, AppState};
