//! Transport, terminal-capability and executor seams.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Operation, ProtocolError};

/// Transport-level error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,
    #[error("Transport failure: {0}")]
    Io(String),
}

/// An ordered, reliable, message-framed, bidirectional connection.
///
/// The relay is indifferent to what carries the frames; WebSocket and an
/// in-process channel pair are the provided implementations.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Receive the next inbound frame.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Send one outbound frame.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the connection, delivering a status code and reason to the
    /// peer. Infallible by contract; a connection that is already gone
    /// has nothing left to close.
    async fn close(&self, code: u16, reason: &str);
}

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

/// Error surfaced by the terminal stream to the executor.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Unexpected '{0}' message in the stream")]
    UnexpectedOperation(Operation),
}

/// Source of stdin bytes for the remote process.
#[async_trait]
pub trait TerminalRead: Send + Sync {
    /// Copy the next chunk of stdin into `buf`, returning the byte count.
    ///
    /// `Ok(0)` means the inbound frame carried no stdin bytes (a resize
    /// lands on the size queue instead); the caller re-invokes.
    ///
    /// # Errors
    /// Any transport or decode failure ends the stream.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError>;
}

/// Sink for the remote process's stdout/stderr.
#[async_trait]
pub trait TerminalWrite: Send + Sync {
    /// Relay one chunk of process output, returning `buf.len()`.
    ///
    /// # Errors
    /// Propagates transport send failures.
    async fn write(&self, buf: &[u8]) -> Result<usize, StreamError>;
}

/// Live feed of terminal-resize events.
#[async_trait]
pub trait SizeSource: Send + Sync {
    /// Wait for the next resize event.
    ///
    /// Invoked in a loop for the lifetime of the process; it only stops
    /// yielding when the streaming task is torn down around it.
    async fn next_size(&self) -> Option<TermSize>;
}

/// The full capability set a streaming executor is written against.
pub trait TerminalIo: TerminalRead + TerminalWrite + SizeSource {}

impl<T: TerminalRead + TerminalWrite + SizeSource> TerminalIo for T {}

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process never started. This is the only error the shell
    /// fallback probe advances past.
    #[error("Failed to start '{program}': {reason}")]
    StartFailed { program: String, reason: String },
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs a command against a terminal stream until it exits.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute `command`, feeding its stdin from `io`, relaying its
    /// output to `io`, and applying resize events from `io`, until the
    /// process exits or the stream fails.
    ///
    /// # Errors
    /// `StartFailed` if the process never started, otherwise the
    /// terminal stream or I/O error that ended it.
    async fn stream(&self, command: &[String], io: Arc<dyn TerminalIo>) -> Result<(), ExecError>;
}
