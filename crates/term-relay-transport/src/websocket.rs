//! WebSocket endpoint for browser terminals.
//!
//! Each upgraded socket is split into send/recv pump tasks bridging it
//! to a [`WsConnection`], then handed to the bind handshake. On a
//! successful bind the pumps keep the socket alive for the streaming
//! side; on rejection they are torn down and the socket drops.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use term_relay_core::{Connection, TransportError};
use term_relay_session::SessionRegistry;

use crate::binder::bind_connection;

/// WebSocket endpoint state.
#[derive(Clone)]
pub struct WsState {
    /// Shared session registry the binder resolves ids against.
    pub registry: Arc<SessionRegistry>,
}

/// Create the binder router, serving the handshake at `/ws`.
#[must_use]
pub fn router(registry: Arc<SessionRegistry>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(WsState { registry })
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<SessionRegistry>) {
    let (connection, pumps) = WsConnection::spawn(socket);

    match bind_connection(&registry, Arc::new(connection)).await {
        Ok(_id) => {
            // The pump tasks now outlive this handler; they end when
            // the socket closes or a close frame is sent.
        }
        Err(err) => {
            tracing::warn!(error = %err, "Rejected WebSocket connection");
            pumps.abort();
        }
    }
}

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Handles to the socket pump tasks.
struct Pumps {
    send: tokio::task::JoinHandle<()>,
    recv: tokio::task::JoinHandle<()>,
}

impl Pumps {
    fn abort(&self) {
        self.send.abort();
        self.recv.abort();
    }
}

/// A WebSocket wrapped as a [`Connection`].
pub(crate) struct WsConnection {
    out_tx: mpsc::UnboundedSender<Outbound>,
    in_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl WsConnection {
    fn spawn(socket: WebSocket) -> (Self, Pumps) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let send = tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                match out {
                    Outbound::Text(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: ws_close_code(code),
                            reason: reason.into(),
                        };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
        });

        let recv = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                if in_tx.send(text).is_err() {
                    break;
                }
            }
        });

        (
            Self {
                out_tx,
                in_rx: tokio::sync::Mutex::new(in_rx),
            },
            Pumps { send, recv },
        )
    }
}

/// Map advisory session status codes onto legal WebSocket close codes.
/// The reason string is what clients actually display.
const fn ws_close_code(status: u16) -> u16 {
    match status {
        1 => 1000,
        2 => 1011,
        code if code >= 1000 => code,
        _ => 1000,
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&self) -> Result<String, TransportError> {
        self.in_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.out_tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self, code: u16, reason: &str) {
        let _ = self.out_tx.send(Outbound::Close {
            code,
            reason: reason.to_owned(),
        });
    }
}
