//! One-shot bind handshake.
//!
//! The first frame on a fresh connection must be a `bind` naming a
//! registered, unbound session. Anything else is log-and-drop: the
//! connection is abandoned and no session is mutated. After a
//! successful bind the streaming side owns all further traffic.

use std::sync::Arc;

use thiserror::Error;

use term_relay_core::{Connection, Operation, ProtocolError, TerminalMessage, TransportError};
use term_relay_session::SessionRegistry;

/// Why a connection was refused at the handshake.
#[derive(Debug, Error)]
pub enum BindRejected {
    #[error("No message received before bind: {0}")]
    Recv(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] ProtocolError),
    #[error("Expected 'bind', got '{0}'")]
    WrongOperation(Operation),
    #[error("Unknown session id '{0}'")]
    UnknownSession(String),
    #[error("Session '{0}' is already bound")]
    AlreadyBound(String),
}

/// Read the handshake frame from `connection` and attach it to the
/// session it names. Returns the bound session id.
///
/// # Errors
/// Any rejection leaves the registry and every session untouched; the
/// caller drops the connection.
pub async fn bind_connection(
    registry: &SessionRegistry,
    connection: Arc<dyn Connection>,
) -> Result<String, BindRejected> {
    let raw = connection.recv().await?;
    let msg = TerminalMessage::decode(&raw)?;
    if msg.operation != Operation::Bind {
        return Err(BindRejected::WrongOperation(msg.operation));
    }

    let Some(session) = registry.lookup(&msg.session_id) else {
        return Err(BindRejected::UnknownSession(msg.session_id));
    };
    session
        .attach(connection)
        .map_err(|_| BindRejected::AlreadyBound(msg.session_id.clone()))?;

    tracing::debug!(session = %msg.session_id, "Transport connection bound");
    Ok(msg.session_id)
}
