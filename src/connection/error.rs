//! Connection error types

use thiserror::Error;

/// Error returned by a send on a connection handle
///
/// Send failures are operational: callers log them and carry on, they never
/// abort delivery to other recipients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The connection was closed locally or the transport dropped its end
    #[error("connection {0} is closed")]
    Closed(u64),
    /// No connection is attached for the target
    #[error("not connected: {0}")]
    NotConnected(String),
}
