//! The transport-backed terminal session.
//!
//! `TerminalSession` is the adapter between a message-framed transport
//! connection and the byte-stream contract a process executor expects:
//! keystrokes, resize events, output and out-of-band toasts are
//! multiplexed over one connection as tagged frames.

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use term_relay_core::{
    Connection, Operation, SizeSource, StreamError, TermSize, TerminalMessage, TerminalRead,
    TerminalWrite, TransportError,
};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    WaitingForBind,
    Bound,
    Running,
    Closed,
}

/// Error attaching a connection to a session.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Session is already bound to a connection")]
pub struct AttachError;

/// One interactive remote-execution session.
///
/// Created unbound; the binder attaches the live connection exactly
/// once, after which the connection is read-only shared state and the
/// streaming side owns all further traffic on it.
pub struct TerminalSession {
    id: String,
    state: Mutex<SessionState>,
    bound_tx: Mutex<Option<oneshot::Sender<()>>>,
    bound_rx: Mutex<Option<oneshot::Receiver<()>>>,
    connection: OnceLock<Arc<dyn Connection>>,
    size_tx: mpsc::UnboundedSender<TermSize>,
    size_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TermSize>>,
}

impl TerminalSession {
    /// Create a new unbound session with the given id.
    #[must_use]
    pub fn new(id: String) -> Arc<Self> {
        let (bound_tx, bound_rx) = oneshot::channel();
        let (size_tx, size_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id,
            state: Mutex::new(SessionState::Created),
            bound_tx: Mutex::new(Some(bound_tx)),
            bound_rx: Mutex::new(Some(bound_rx)),
            connection: OnceLock::new(),
            size_tx,
            size_rx: tokio::sync::Mutex::new(size_rx),
        })
    }

    /// The session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock().unwrap();
        tracing::debug!(session = %self.id, from = ?*current, to = ?state, "Session state");
        *current = state;
    }

    /// Hand the one-shot bound signal to the lifecycle task. Yields
    /// `Some` exactly once.
    pub(crate) fn take_bound_signal(&self) -> Option<oneshot::Receiver<()>> {
        self.bound_rx.lock().unwrap().take()
    }

    /// Whether a connection has been attached.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.connection.get().is_some()
    }

    /// Attach the live transport connection and fire the bound signal.
    ///
    /// Single-shot: a second attach is rejected and the first
    /// connection is kept.
    ///
    /// # Errors
    /// Fails if the session is already bound.
    pub fn attach(&self, connection: Arc<dyn Connection>) -> Result<(), AttachError> {
        self.connection.set(connection).map_err(|_| AttachError)?;
        if let Some(tx) = self.bound_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn connection(&self) -> Result<&Arc<dyn Connection>, TransportError> {
        self.connection.get().ok_or(TransportError::Closed)
    }

    /// Send an out-of-band notice to the user without disturbing the
    /// stdin/stdout stream.
    ///
    /// # Errors
    /// Propagates encode and transport failures.
    pub async fn toast(&self, text: &str) -> Result<(), StreamError> {
        let frame = TerminalMessage::toast(text).encode()?;
        self.connection()?.send(frame).await?;
        Ok(())
    }

    /// Close the underlying connection, delivering `code` and `reason`
    /// to the client. Safe on a session that never bound.
    pub async fn close(&self, code: u16, reason: &str) {
        if let Some(connection) = self.connection.get() {
            connection.close(code, reason).await;
        }
    }
}

#[async_trait]
impl TerminalRead for TerminalSession {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let raw = self.connection()?.recv().await?;
        let msg = TerminalMessage::decode(&raw)?;
        match msg.operation {
            Operation::Stdin => {
                let bytes = msg.data.as_bytes();
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Operation::Resize => {
                // Zero bytes consumed; the event lands on the size
                // queue and the caller re-invokes.
                let _ = self.size_tx.send(TermSize {
                    rows: msg.rows,
                    cols: msg.cols,
                });
                Ok(0)
            }
            op => Err(StreamError::UnexpectedOperation(op)),
        }
    }
}

#[async_trait]
impl TerminalWrite for TerminalSession {
    async fn write(&self, buf: &[u8]) -> Result<usize, StreamError> {
        let frame = TerminalMessage::stdout(buf).encode()?;
        self.connection()?.send(frame).await?;
        Ok(buf.len())
    }
}

#[async_trait]
impl SizeSource for TerminalSession {
    async fn next_size(&self) -> Option<TermSize> {
        self.size_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use term_relay_core::memory;

    fn bound_session() -> (Arc<TerminalSession>, memory::MemoryConnection) {
        let (client, server) = memory::pair();
        let session = TerminalSession::new("a".repeat(32));
        session.attach(Arc::new(server)).unwrap();
        (session, client)
    }

    #[tokio::test]
    async fn read_copies_stdin_bytes() {
        let (session, client) = bound_session();
        client
            .send(TerminalMessage::stdin("ls\n").encode().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = session.read(&mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..n], b"ls\n");
    }

    #[tokio::test]
    async fn read_truncates_to_the_buffer() {
        let (session, client) = bound_session();
        client
            .send(TerminalMessage::stdin("abcdef").encode().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        let n = session.read(&mut buf).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..n], b"abcd");
    }

    #[tokio::test]
    async fn resize_consumes_no_bytes_and_queues_fifo() {
        let (session, client) = bound_session();
        for (rows, cols) in [(40, 120), (25, 80)] {
            client
                .send(TerminalMessage::resize(rows, cols).encode().unwrap())
                .await
                .unwrap();
        }

        let mut buf = [0u8; 16];
        assert_eq!(session.read(&mut buf).await.unwrap(), 0);
        assert_eq!(session.read(&mut buf).await.unwrap(), 0);

        assert_eq!(session.next_size().await, Some(TermSize { rows: 40, cols: 120 }));
        assert_eq!(session.next_size().await, Some(TermSize { rows: 25, cols: 80 }));
    }

    #[tokio::test]
    async fn unexpected_operation_ends_the_stream() {
        let (session, client) = bound_session();
        client
            .send(TerminalMessage::bind("a".repeat(32)).encode().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let err = session.read(&mut buf).await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::UnexpectedOperation(Operation::Bind)
        ));
    }

    #[tokio::test]
    async fn decode_failure_ends_the_stream() {
        let (session, client) = bound_session();
        client.send("not json".into()).await.unwrap();

        let mut buf = [0u8; 16];
        assert!(matches!(
            session.read(&mut buf).await,
            Err(StreamError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn write_relays_a_stdout_frame() {
        let (session, client) = bound_session();
        assert_eq!(session.write(b"file.txt\n").await.unwrap(), 9);

        let frame = TerminalMessage::decode(&client.recv().await.unwrap()).unwrap();
        assert_eq!(frame.operation, Operation::Stdout);
        assert_eq!(frame.data, "file.txt\n");
    }

    #[tokio::test]
    async fn toast_is_out_of_band() {
        let (session, client) = bound_session();
        session.toast("no shell available").await.unwrap();

        let frame = TerminalMessage::decode(&client.recv().await.unwrap()).unwrap();
        assert_eq!(frame.operation, Operation::Toast);
        assert_eq!(frame.data, "no shell available");
    }

    #[tokio::test]
    async fn attach_is_single_shot() {
        let (session, client) = bound_session();
        let (_client2, server2) = memory::pair();
        assert_eq!(session.attach(Arc::new(server2)), Err(AttachError));

        // First connection still serves the stream.
        assert_eq!(session.write(b"hi").await.unwrap(), 2);
        assert!(client.recv().await.is_ok());
    }

    #[tokio::test]
    async fn attach_fires_the_bound_signal_once() {
        let (client, server) = memory::pair();
        drop(client);
        let session = TerminalSession::new("b".repeat(32));
        let bound = session.take_bound_signal().unwrap();
        assert!(session.take_bound_signal().is_none());

        session.attach(Arc::new(server)).unwrap();
        bound.await.unwrap();
    }

    #[tokio::test]
    async fn unbound_session_reads_fail_and_close_is_safe() {
        let session = TerminalSession::new("c".repeat(32));
        let mut buf = [0u8; 4];
        assert!(matches!(
            session.read(&mut buf).await,
            Err(StreamError::Transport(TransportError::Closed))
        ));
        session.close(2, "never bound").await;
    }
}
