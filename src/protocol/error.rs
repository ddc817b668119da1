//! Protocol error types

use thiserror::Error;

/// Error raised while turning an inbound envelope into a typed message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Envelope is not a JSON object
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// Envelope has no `type` tag
    #[error("missing message type")]
    MissingType,
    /// Type tag is not part of the message taxonomy for this sender
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    /// A field required by the message type is absent or has the wrong shape
    #[error("invalid field `{field}` in {message_type}")]
    InvalidField {
        message_type: &'static str,
        field: &'static str,
    },
    /// First message on a new connection was not a `connection_init`
    #[error("expected connection_init, got {0}")]
    HandshakeRequired(String),
    /// Envelope names a different package than the connection it arrived on
    #[error("package mismatch: connection is {expected}, message names {actual}")]
    PackageMismatch { expected: String, actual: String },
}
