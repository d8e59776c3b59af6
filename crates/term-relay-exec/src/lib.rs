//! Process launching for the terminal relay.
//!
//! Provides:
//! - `ShellPolicy` + `launch` - shell allow-list and fallback probing
//! - `PtyExecutor` - a `RemoteExecutor` running commands on a local PTY

pub mod launcher;
pub mod pty;

pub use launcher::{launch, ShellPolicy};
pub use pty::PtyExecutor;
