//! Server registry implementation
//!
//! Tracks app-server registrations, their heartbeats, and the sessions each
//! registration is serving, so a restarted server can be pointed back at its
//! sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::config::RegistryConfig;
use super::entry::{RegistrationState, RegistrationStats, ServerRegistration};
use super::error::RegistryError;
use crate::protocol::{PackageName, RegistrationId, SessionId};

/// What `notify_restart` must reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryTarget {
    pub registration_id: RegistrationId,
    pub package: PackageName,
    pub webhook_url: String,
    pub session_ids: Vec<SessionId>,
}

/// Registry of app-server registrations
///
/// Thread-safe via `RwLock`; shared by every session of the hub.
pub struct ServerRegistry {
    registrations: RwLock<HashMap<RegistrationId, ServerRegistration>>,
    config: RegistryConfig,
}

impl ServerRegistry {
    /// Create a new server registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new server registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register an app server
    ///
    /// A registration for the same package and webhook URL replaces the
    /// previous one and takes over its sessions, so a restarted server can
    /// re-register and then call [`notify_restart`](Self::notify_restart)
    /// with its new id.
    pub async fn register(
        &self,
        package: PackageName,
        credential: &str,
        webhook_url: &str,
        server_urls: Vec<String>,
    ) -> Result<RegistrationId, RegistryError> {
        if !(webhook_url.starts_with("http://") || webhook_url.starts_with("https://")) {
            return Err(RegistryError::InvalidWebhook(webhook_url.to_owned()));
        }

        let mut registrations = self.registrations.write().await;
        let mut entry = ServerRegistration::new(package, credential, webhook_url.to_owned(), server_urls);

        let superseded: Vec<RegistrationId> = registrations
            .values()
            .filter(|r| r.package == entry.package && r.webhook_url == entry.webhook_url)
            .map(|r| r.id)
            .collect();

        for old_id in superseded {
            if let Some(old) = registrations.remove(&old_id) {
                tracing::info!(
                    old_id = %old_id,
                    new_id = %entry.id,
                    package = %entry.package,
                    sessions = old.sessions.len(),
                    "Registration superseded"
                );
                entry.sessions.extend(old.sessions);
            }
        }

        let id = entry.id;
        tracing::info!(
            registration_id = %id,
            package = %entry.package,
            webhook = %entry.webhook_url,
            "App server registered"
        );
        registrations.insert(id, entry);

        Ok(id)
    }

    /// Record a heartbeat
    ///
    /// An inactive registration stays inactive; the server must register
    /// again.
    pub async fn heartbeat(&self, id: RegistrationId) -> Result<(), RegistryError> {
        let mut registrations = self.registrations.write().await;
        let entry = registrations.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        if !entry.is_active() {
            return Err(RegistryError::Expired(id));
        }

        entry.last_heartbeat = Instant::now();
        tracing::trace!(registration_id = %id, "Heartbeat");
        Ok(())
    }

    /// Add a session to a registration; returns whether it was new
    pub async fn associate(&self, id: RegistrationId, session: SessionId) -> Result<bool, RegistryError> {
        let mut registrations = self.registrations.write().await;
        let entry = registrations.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        Ok(entry.sessions.insert(session))
    }

    /// Add a session to every active registration of a package
    ///
    /// Called when an app attaches; returns how many registrations matched.
    pub async fn associate_package(&self, package: &PackageName, session: SessionId) -> usize {
        let mut registrations = self.registrations.write().await;
        let mut matched = 0;

        for entry in registrations.values_mut() {
            if entry.is_active() && &entry.package == package {
                entry.sessions.insert(session);
                matched += 1;
            }
        }

        if matched > 0 {
            tracing::debug!(package = %package, session_id = %session, registrations = matched, "Session associated");
        }
        matched
    }

    /// Forget a session everywhere (the session ended)
    pub async fn dissociate_session(&self, session: SessionId) {
        let mut registrations = self.registrations.write().await;
        for entry in registrations.values_mut() {
            entry.sessions.remove(&session);
        }
    }

    /// Resolve what a restarted server must be told about
    ///
    /// Inactive registrations are reported as [`RegistryError::Expired`] and
    /// no recovery is dispatched for them.
    pub async fn notify_restart(&self, id: RegistrationId, credential: &str) -> Result<RecoveryTarget, RegistryError> {
        let registrations = self.registrations.read().await;
        let entry = registrations.get(&id).ok_or(RegistryError::NotFound(id))?;

        if !entry.credential_matches(credential) {
            tracing::warn!(registration_id = %id, package = %entry.package, "Restart notification with bad credential");
            return Err(RegistryError::CredentialMismatch(id));
        }

        if !entry.is_active() {
            tracing::debug!(registration_id = %id, "Restart notification for expired registration skipped");
            return Err(RegistryError::Expired(id));
        }

        let mut session_ids: Vec<SessionId> = entry.sessions.iter().copied().collect();
        session_ids.sort_by_key(|s| s.to_string());

        Ok(RecoveryTarget {
            registration_id: id,
            package: entry.package.clone(),
            webhook_url: entry.webhook_url.clone(),
            session_ids,
        })
    }

    /// Get a copy of a registration
    pub async fn get(&self, id: RegistrationId) -> Option<ServerRegistration> {
        self.registrations.read().await.get(&id).cloned()
    }

    /// Get registration statistics
    pub async fn get_stats(&self, id: RegistrationId) -> Option<RegistrationStats> {
        let registrations = self.registrations.read().await;
        registrations.get(&id).map(|entry| RegistrationStats {
            package: entry.package.clone(),
            state: entry.state,
            session_count: entry.sessions.len(),
            since_heartbeat: entry.last_heartbeat.elapsed(),
        })
    }

    /// Get total number of registrations
    pub async fn registration_count(&self) -> usize {
        self.registrations.read().await.len()
    }

    /// Run cleanup once
    ///
    /// - Active registrations silent for longer than the heartbeat timeout
    ///   become inactive
    /// - Inactive registrations older than `removal_after` are removed
    pub async fn cleanup(&self) {
        let mut registrations = self.registrations.write().await;
        let now = Instant::now();
        let timeout = self.config.heartbeat_timeout();

        for entry in registrations.values_mut() {
            if entry.state == RegistrationState::Active && now.duration_since(entry.last_heartbeat) > timeout {
                entry.mark_inactive(now);
                tracing::warn!(
                    registration_id = %entry.id,
                    package = %entry.package,
                    sessions = entry.sessions.len(),
                    "Heartbeat missed, registration inactive"
                );
            }
        }

        let removal_after = self.config.removal_after;
        registrations.retain(|id, entry| {
            let keep = entry
                .inactive_since
                .map_or(true, |since| now.duration_since(since) <= removal_after);
            if !keep {
                tracing::info!(registration_id = %id, package = %entry.package, "Registration removed by cleanup");
            }
            keep
        });
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
