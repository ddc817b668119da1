//! Registry error types
//!
//! Error types for server registry operations.

use thiserror::Error;

use crate::protocol::RegistrationId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No registration with this id
    #[error("registration not found: {0}")]
    NotFound(RegistrationId),
    /// Registration missed its heartbeats and is inactive
    #[error("registration expired: {0}")]
    Expired(RegistrationId),
    /// Webhook URL is not an http(s) URL
    #[error("invalid webhook url: {0}")]
    InvalidWebhook(String),
    /// Credential does not match the one given at registration
    #[error("credential mismatch for registration {0}")]
    CredentialMismatch(RegistrationId),
}
