//! Wire protocol between the browser terminal and the relay.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol codec error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Message operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Attach a freshly opened connection to a registered session.
    Bind,
    /// Keystrokes / paste buffer for the process.
    Stdin,
    /// New terminal size.
    Resize,
    /// Output from the process.
    Stdout,
    /// Out-of-band notice shown to the user.
    Toast,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bind => "bind",
            Self::Stdin => "stdin",
            Self::Resize => "resize",
            Self::Stdout => "stdout",
            Self::Toast => "toast",
        };
        f.write_str(name)
    }
}

/// One frame of the session protocol.
///
/// | operation | direction        | fields used  |
/// |-----------|------------------|--------------|
/// | `bind`    | client -> relay  | `session_id` |
/// | `stdin`   | client -> relay  | `data`       |
/// | `resize`  | client -> relay  | `rows`, `cols` |
/// | `stdout`  | relay -> client  | `data`       |
/// | `toast`   | relay -> client  | `data`       |
///
/// Fields not used by an operation decode to their zero values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalMessage {
    pub operation: Operation,
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub rows: u16,
    #[serde(default)]
    pub cols: u16,
}

impl TerminalMessage {
    /// A `bind` frame correlating a connection with a registered session.
    #[must_use]
    pub fn bind<S: Into<String>>(session_id: S) -> Self {
        Self {
            operation: Operation::Bind,
            data: String::new(),
            session_id: session_id.into(),
            rows: 0,
            cols: 0,
        }
    }

    /// A `stdin` frame carrying keystrokes for the process.
    #[must_use]
    pub fn stdin<S: Into<String>>(data: S) -> Self {
        Self {
            operation: Operation::Stdin,
            data: data.into(),
            session_id: String::new(),
            rows: 0,
            cols: 0,
        }
    }

    /// A `resize` frame announcing a new terminal size.
    #[must_use]
    pub fn resize(rows: u16, cols: u16) -> Self {
        Self {
            operation: Operation::Resize,
            data: String::new(),
            session_id: String::new(),
            rows,
            cols,
        }
    }

    /// A `stdout` frame relaying raw process output.
    ///
    /// Output is relayed as text; bytes that are not valid UTF-8 are
    /// replaced rather than dropped.
    #[must_use]
    pub fn stdout(data: &[u8]) -> Self {
        Self {
            operation: Operation::Stdout,
            data: String::from_utf8_lossy(data).into_owned(),
            session_id: String::new(),
            rows: 0,
            cols: 0,
        }
    }

    /// A `toast` frame carrying an out-of-band user notice.
    #[must_use]
    pub fn toast<S: Into<String>>(text: S) -> Self {
        Self {
            operation: Operation::Toast,
            data: text.into(),
            session_id: String::new(),
            rows: 0,
            cols: 0,
        }
    }

    /// Encode to the JSON wire form.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire form.
    ///
    /// # Errors
    /// Returns an error for anything that is not a well-formed frame.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}
