//! Core abstractions for the interactive terminal relay.
//!
//! This crate provides the pieces everything else is written against:
//! - `TerminalMessage` - the tagged wire protocol exchanged with the client
//! - `Connection` - the ordered, message-framed transport seam
//! - `TerminalRead` / `TerminalWrite` / `SizeSource` - the capability set
//!   a streaming process executor consumes
//! - `RemoteExecutor` - the process execution seam
//! - `memory` - an in-process `Connection` pair for tests and embedding

pub mod memory;
pub mod protocol;
pub mod traits;

pub use protocol::{Operation, ProtocolError, TerminalMessage};
pub use traits::{
    Connection, ExecError, RemoteExecutor, SizeSource, StreamError, TermSize, TerminalIo,
    TerminalRead, TerminalWrite, TransportError,
};
