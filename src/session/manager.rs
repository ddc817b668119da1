//! Session manager
//!
//! Maps session ids and users to running session tasks. The map itself only
//! holds handles; all session state lives inside each task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::actor::{self, SessionHandle};
use super::error::SessionError;
use super::snapshot::SessionSnapshot;
use super::state::Session;
use crate::connection::ConnectionHandle;
use crate::display::DisplayConfig;
use crate::protocol::{AppOutbound, GlassesOutbound, PackageName, SessionId, UserId};
use crate::server::AccessPolicy;

struct SessionEntry {
    handle: SessionHandle,
    /// Set while the glasses are away; drives grace-period cleanup
    disconnected_at: Option<Instant>,
    /// Connection id of the attached glasses
    glasses_connection: Option<u64>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, SessionEntry>,
    by_user: HashMap<UserId, SessionId>,
}

/// Registry of live sessions
pub struct SessionManager {
    tables: RwLock<Tables>,
    display_config: DisplayConfig,
    grace_period: Duration,
    policy: Arc<dyn AccessPolicy>,
}

impl SessionManager {
    pub fn new(display_config: DisplayConfig, grace_period: Duration, policy: Arc<dyn AccessPolicy>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            display_config,
            grace_period,
            policy,
        }
    }

    /// Session for `user_id`, created if the user has none
    ///
    /// A user has at most one session; reconnecting glasses get the existing
    /// one back.
    pub async fn create_session(&self, user_id: &str) -> SessionHandle {
        let mut tables = self.tables.write().await;

        if let Some(id) = tables.by_user.get(user_id).copied() {
            if let Some(entry) = tables.sessions.get(&id) {
                if !entry.handle.is_closed() {
                    tracing::debug!(session_id = %id, user_id = %user_id, "Reusing session");
                    return entry.handle.clone();
                }
            }
            tables.sessions.remove(&id);
        }

        let id = SessionId::new();
        let session = Session::new(
            id,
            user_id.to_owned(),
            self.display_config.clone(),
            Arc::clone(&self.policy),
        );
        let (handle, _task) = actor::spawn(session);

        tables.sessions.insert(
            id,
            SessionEntry {
                handle: handle.clone(),
                disconnected_at: None,
                glasses_connection: None,
            },
        );
        tables.by_user.insert(user_id.to_owned(), id);

        tracing::info!(session_id = %id, user_id = %user_id, "Session created");

        handle
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionHandle> {
        let tables = self.tables.read().await;
        tables.sessions.get(&id).map(|e| e.handle.clone())
    }

    /// Session currently held by a user
    pub async fn for_user(&self, user_id: &str) -> Option<SessionHandle> {
        let tables = self.tables.read().await;
        let id = tables.by_user.get(user_id)?;
        tables.sessions.get(id).map(|e| e.handle.clone())
    }

    pub async fn user_of(&self, id: SessionId) -> Option<UserId> {
        self.get(id).await.map(|h| h.user_id().clone())
    }

    pub async fn attach_glasses(&self, id: SessionId, handle: ConnectionHandle<GlassesOutbound>) -> Result<(), SessionError> {
        let mut tables = self.tables.write().await;
        let entry = tables.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        entry.disconnected_at = None;
        entry.glasses_connection = Some(handle.id());
        entry.handle.attach_glasses(handle)
    }

    /// Start the grace period for a session whose glasses went away
    ///
    /// `connection_id` identifies the connection that closed. A close from a
    /// connection the glasses have already replaced is ignored; returns
    /// whether the grace period started.
    pub async fn glasses_disconnected(&self, id: SessionId, connection_id: u64) -> Result<bool, SessionError> {
        let mut tables = self.tables.write().await;
        let entry = tables.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;

        if entry.glasses_connection != Some(connection_id) {
            tracing::debug!(
                session_id = %id,
                connection_id = connection_id,
                current = ?entry.glasses_connection,
                "Ignoring close of replaced glasses connection"
            );
            return Ok(false);
        }
        entry.glasses_connection = None;
        entry.disconnected_at.get_or_insert_with(Instant::now);

        tracing::debug!(
            session_id = %id,
            connection_id = connection_id,
            grace_period_secs = self.grace_period.as_secs(),
            "Glasses disconnected, entering grace period"
        );

        entry.handle.glasses_disconnected(connection_id)?;
        Ok(true)
    }

    pub async fn attach_app(
        &self,
        id: SessionId,
        package: PackageName,
        handle: ConnectionHandle<AppOutbound>,
    ) -> Result<(), SessionError> {
        self.require(id).await?.attach_app(package, handle)
    }

    /// Detach the app connection `connection_id`; a stale id is ignored by
    /// the session
    pub async fn detach_app(&self, id: SessionId, package: PackageName, connection_id: u64) -> Result<(), SessionError> {
        self.require(id).await?.detach_app(package, connection_id)
    }

    pub async fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, SessionError> {
        self.require(id).await?.snapshot().await
    }

    /// End a session: stop its task and forget it
    pub async fn end_session(&self, id: SessionId) -> bool {
        let mut tables = self.tables.write().await;
        let Some(entry) = tables.sessions.remove(&id) else {
            return false;
        };

        let user_id = entry.handle.user_id().clone();
        if tables.by_user.get(&user_id) == Some(&id) {
            tables.by_user.remove(&user_id);
        }
        let _ = entry.handle.shutdown();

        tracing::info!(session_id = %id, user_id = %user_id, "Session ended");
        true
    }

    /// End every session whose glasses have been away longer than the grace
    /// period; returns the ended ids
    pub async fn cleanup(&self) -> Vec<SessionId> {
        let now = Instant::now();

        let expired: Vec<SessionId> = {
            let tables = self.tables.read().await;
            tables
                .sessions
                .iter()
                .filter(|(_, entry)| {
                    entry.handle.is_closed()
                        || entry
                            .disconnected_at
                            .is_some_and(|at| now.duration_since(at) > self.grace_period)
                })
                .map(|(id, _)| *id)
                .collect()
        };

        let mut ended = Vec::with_capacity(expired.len());
        for id in expired {
            if self.end_session(id).await {
                ended.push(id);
            }
        }
        ended
    }

    /// End every session
    pub async fn shutdown_all(&self) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self.tables.read().await.sessions.keys().copied().collect();
        for id in &ids {
            self.end_session(*id).await;
        }
        ids
    }

    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    async fn require(&self, id: SessionId) -> Result<SessionHandle, SessionError> {
        self.get(id).await.ok_or(SessionError::NotFound(id))
    }
}
