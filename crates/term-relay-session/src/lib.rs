//! Session management for the terminal relay.
//!
//! Provides:
//! - `SessionRegistry` - concurrent id -> session table
//! - `TerminalSession` - the transport-backed terminal stream adapter
//! - `Coordinator` - per-session lifecycle orchestration

pub mod coordinator;
pub mod registry;
pub mod terminal;

pub use coordinator::{Coordinator, CoordinatorConfig, SessionError, STATUS_ERROR, STATUS_NORMAL};
pub use registry::{RegistryError, SessionRegistry};
pub use terminal::{AttachError, SessionState, TerminalSession};
