//! Registration entry and state types
//!
//! This module defines the per-registration state stored in the registry.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::protocol::{PackageName, RegistrationId, SessionId};

/// State of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Heartbeats are arriving
    Active,
    /// Heartbeats stopped; recovery dispatch is skipped
    Inactive,
}

/// One app server registration
#[derive(Debug, Clone)]
pub struct ServerRegistration {
    /// Registration ID
    pub id: RegistrationId,

    /// App the server hosts
    pub package: PackageName,

    /// SHA-256 hex digest of the registration credential
    pub credential_hash: String,

    /// Where recovery notifications are posted
    pub webhook_url: String,

    /// Candidate server URLs
    pub server_urls: Vec<String>,

    /// Last heartbeat (or registration) time
    pub last_heartbeat: Instant,

    /// Sessions the server is currently serving
    pub sessions: HashSet<SessionId>,

    /// Current state
    pub state: RegistrationState,

    /// When the registration went inactive
    pub inactive_since: Option<Instant>,

    /// When the registration was created
    pub registered_at: Instant,
}

impl ServerRegistration {
    pub(super) fn new(
        package: PackageName,
        credential: &str,
        webhook_url: String,
        server_urls: Vec<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: RegistrationId::new(),
            package,
            credential_hash: hash_credential(credential),
            webhook_url,
            server_urls,
            last_heartbeat: now,
            sessions: HashSet::new(),
            state: RegistrationState::Active,
            inactive_since: None,
            registered_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == RegistrationState::Active
    }

    /// Check a credential against the stored digest
    pub fn credential_matches(&self, credential: &str) -> bool {
        hash_credential(credential) == self.credential_hash
    }

    pub(super) fn mark_inactive(&mut self, now: Instant) {
        self.state = RegistrationState::Inactive;
        self.inactive_since = Some(now);
    }
}

/// SHA-256 hex digest of a credential
pub fn hash_credential(credential: &str) -> String {
    hex::encode(Sha256::digest(credential.as_bytes()))
}

/// Statistics for a registration
#[derive(Debug, Clone)]
pub struct RegistrationStats {
    /// App the server hosts
    pub package: PackageName,
    /// Current state
    pub state: RegistrationState,
    /// Number of associated sessions
    pub session_count: usize,
    /// Time since the last heartbeat
    pub since_heartbeat: std::time::Duration,
}
