//! Error types for the hub
//!
//! Each module keeps its own error enum next to its code; [`Error`] wraps
//! them for callers of the [`Hub`](crate::server::Hub) facade.

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::display::DisplayError;
use crate::protocol::ProtocolError;
use crate::registry::RegistryError;
use crate::session::SessionError;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("display error: {0}")]
    Display(#[from] DisplayError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Result alias using the crate error type
pub type Result<T> = std::result::Result<T, Error>;
