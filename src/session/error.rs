//! Session error types

use thiserror::Error;

use crate::protocol::SessionId;

/// Error for operations addressed to a session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No live session with this id
    #[error("session not found: {0}")]
    NotFound(SessionId),
    /// The id could not be parsed
    #[error("invalid session id: {0}")]
    InvalidId(String),
    /// The session task has stopped
    #[error("session closed: {0}")]
    Closed(SessionId),
}
