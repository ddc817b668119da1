//! Non-blocking connection handles
//!
//! A handle is the sending half of an unbounded channel drained by the
//! transport task that owns the actual socket. Sending never waits, so a slow
//! peer can never stall the session that is sending to it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::error::ConnectionError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Sending side of one peer connection
#[derive(Debug)]
pub struct ConnectionHandle<M> {
    id: u64,
    tx: mpsc::UnboundedSender<M>,
    open: Arc<AtomicBool>,
}

impl<M> Clone for ConnectionHandle<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
            open: Arc::clone(&self.open),
        }
    }
}

impl<M> ConnectionHandle<M> {
    /// Create a handle and the receiver the transport drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::from_sender(tx), rx)
    }

    /// Wrap an existing sender
    pub fn from_sender(tx: mpsc::UnboundedSender<M>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Process-unique connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a message for the peer
    pub fn send(&self, msg: M) -> Result<(), ConnectionError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed(self.id));
        }

        self.tx.send(msg).map_err(|_| {
            self.open.store(false, Ordering::Release);
            ConnectionError::Closed(self.id)
        })
    }

    /// Mark the connection closed; later sends fail
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether sends can still succeed
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}
