//! Transport endpoints for the terminal relay.
//!
//! Provides:
//! - `bind_connection` - the transport-agnostic one-shot bind handshake
//! - WebSocket endpoint (axum) wrapping sockets as `Connection`s

pub mod binder;
pub mod websocket;

pub use binder::{bind_connection, BindRejected};
pub use websocket::{router, ws_handler, WsState};
