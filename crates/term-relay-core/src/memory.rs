//! In-process `Connection` pair.
//!
//! Two cross-wired unbounded channels with an observable close frame.
//! Used by tests throughout the workspace and by embedders whose
//! transport is not a socket.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{Connection, TransportError};

#[derive(Default)]
struct CloseSlot {
    frame: Mutex<Option<(u16, String)>>,
}

/// One end of an in-process connection pair.
pub struct MemoryConnection {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    sent_close: Arc<CloseSlot>,
    peer_close: Arc<CloseSlot>,
}

/// Create a connected pair. Frames sent on one end arrive on the other.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a_close = Arc::new(CloseSlot::default());
    let b_close = Arc::new(CloseSlot::default());

    let a = MemoryConnection {
        tx: Mutex::new(Some(b_tx)),
        rx: tokio::sync::Mutex::new(a_rx),
        sent_close: Arc::clone(&a_close),
        peer_close: Arc::clone(&b_close),
    };
    let b = MemoryConnection {
        tx: Mutex::new(Some(a_tx)),
        rx: tokio::sync::Mutex::new(b_rx),
        sent_close: b_close,
        peer_close: a_close,
    };
    (a, b)
}

impl MemoryConnection {
    /// Close code and reason delivered by the peer, if it closed.
    #[must_use]
    pub fn peer_close(&self) -> Option<(u16, String)> {
        self.peer_close.frame.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn recv(&self) -> Result<String, TransportError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        let guard = self.tx.lock().unwrap();
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&self, code: u16, reason: &str) {
        *self.sent_close.frame.lock().unwrap() = Some((code, reason.to_owned()));
        // Dropping the sender lets the peer's recv observe the closure.
        self.tx.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pair_in_order() {
        let (a, b) = pair();
        a.send("one".into()).await.unwrap();
        a.send("two".into()).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), "one");
        assert_eq!(b.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn close_is_observable_from_the_peer() {
        let (a, b) = pair();
        a.close(1, "Process exited").await;

        assert!(matches!(b.recv().await, Err(TransportError::Closed)));
        assert_eq!(b.peer_close(), Some((1, "Process exited".to_owned())));
        assert!(matches!(a.send("late".into()).await, Err(TransportError::Closed)));
    }
}
