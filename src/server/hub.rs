//! Hub facade
//!
//! Entry point for the transport layer: it hands over already-framed text
//! messages and per-connection send handles, and the hub routes them to the
//! right session.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::connection::ConnectionHandle;
use crate::error::{Error, Result};
use crate::protocol::{
    AppMessage, AppOutbound, GlassesMessage, GlassesOutbound, PackageName, ProtocolError, RegistrationId,
    SessionId,
};
use crate::registry::ServerRegistry;
use crate::server::config::HubConfig;
use crate::server::handler::{AccessPolicy, HubHandler, RecoveryNotification};
use crate::session::{SessionError, SessionHandle, SessionManager, SessionSnapshot};

/// The multiplexing hub
pub struct Hub<H: HubHandler> {
    config: HubConfig,
    handler: Arc<H>,
    sessions: Arc<SessionManager>,
    servers: Arc<ServerRegistry>,
}

impl<H: HubHandler> Hub<H> {
    /// Create a new hub with the given configuration and handler
    pub fn new(config: HubConfig, handler: H) -> Self {
        let handler = Arc::new(handler);
        let policy: Arc<dyn AccessPolicy> = handler.clone();

        Self {
            sessions: Arc::new(SessionManager::new(
                config.display.clone(),
                config.session_grace_period,
                policy,
            )),
            servers: Arc::new(ServerRegistry::with_config(config.registry.clone())),
            handler,
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Get a reference to the session manager
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Get a reference to the server registry
    pub fn servers(&self) -> &Arc<ServerRegistry> {
        &self.servers
    }

    /// Authenticate a glasses connection from its first frame
    ///
    /// Reuses the user's session if one exists.
    pub async fn connect_glasses(&self, init: &str, conn: ConnectionHandle<GlassesOutbound>) -> Result<SessionId> {
        let core_token = match GlassesMessage::parse(init) {
            Ok(GlassesMessage::ConnectionInit { core_token }) => core_token,
            Ok(other) => {
                let err = ProtocolError::HandshakeRequired(other.type_tag().to_owned());
                reject_glasses(&conn, &err.to_string());
                return Err(err.into());
            }
            Err(e) => {
                reject_glasses(&conn, &e.to_string());
                return Err(e.into());
            }
        };

        let Some(user_id) = self.handler.validate_core_token(&core_token) else {
            tracing::warn!("Glasses connection rejected: invalid core token");
            reject_glasses(&conn, "invalid core token");
            return Err(Error::Auth("invalid core token".into()));
        };

        let session = self.sessions.create_session(&user_id).await;
        self.sessions.attach_glasses(session.id(), conn).await?;
        Ok(session.id())
    }

    /// Route a frame from the glasses
    pub async fn handle_glasses_message(&self, session_id: SessionId, raw: &str) -> Result<()> {
        let message = GlassesMessage::parse(raw)?;
        self.session(session_id).await?.glasses_message(message)?;
        Ok(())
    }

    /// The glasses connection `connection_id` closed
    ///
    /// The session enters its grace period unless the glasses already
    /// reconnected on a newer connection, in which case the close is ignored.
    /// Returns whether the grace period started.
    pub async fn disconnect_glasses(&self, session_id: SessionId, connection_id: u64) -> Result<bool> {
        Ok(self.sessions.glasses_disconnected(session_id, connection_id).await?)
    }

    /// Authenticate an app connection from its first frame and attach it
    pub async fn connect_app(
        &self,
        init: &str,
        conn: ConnectionHandle<AppOutbound>,
    ) -> Result<(SessionId, PackageName)> {
        let message = match AppMessage::parse(init) {
            Ok(message) => message,
            Err(e) => {
                reject_app(&conn, &e.to_string());
                return Err(e.into());
            }
        };

        let tag = message.type_tag();
        let AppMessage::ConnectionInit {
            package_name,
            session_id,
            api_key,
        } = message
        else {
            let err = ProtocolError::HandshakeRequired(tag.to_owned());
            reject_app(&conn, &err.to_string());
            return Err(err.into());
        };

        if !self.handler.validate_app_key(&package_name, &api_key) {
            tracing::warn!(package = %package_name, "App connection rejected: invalid API key");
            reject_app(&conn, "invalid API key");
            return Err(Error::Auth(format!("invalid API key for {package_name}")));
        }

        let Some(id) = SessionId::parse(&session_id) else {
            reject_app(&conn, "invalid session id");
            return Err(SessionError::InvalidId(session_id).into());
        };

        let Some(session) = self.sessions.get(id).await else {
            tracing::debug!(session_id = %id, package = %package_name, "App connection for unknown session");
            reject_app(&conn, "session not found");
            return Err(SessionError::NotFound(id).into());
        };

        session.attach_app(package_name.clone(), conn)?;
        self.servers.associate_package(&package_name, id).await;

        Ok((id, package_name))
    }

    /// Route a frame from an app connection bound to `package`
    ///
    /// Errors cover only frames that cannot be routed (malformed, wrong
    /// package, unknown session). The display outcome is decided later by the
    /// session task: a malformed display request is answered with
    /// `display_rejected`, while throttled or lock-blocked requests are not
    /// errors and are visible only through [`Hub::snapshot`] metrics.
    pub async fn handle_app_message(&self, session_id: SessionId, package: &PackageName, raw: &str) -> Result<()> {
        let message = AppMessage::parse(raw)?;
        message.ensure_from(package)?;
        self.session(session_id).await?.app_message(package.clone(), message)?;
        Ok(())
    }

    /// The app connection `connection_id` closed; the app keeps running
    ///
    /// Ignored when the app already reconnected on a newer connection.
    pub async fn disconnect_app(&self, session_id: SessionId, package: PackageName, connection_id: u64) -> Result<()> {
        self.sessions.detach_app(session_id, package, connection_id).await?;
        Ok(())
    }

    /// Release the background display lock held by `package`
    pub async fn release_lock(&self, session_id: SessionId, package: PackageName) -> Result<()> {
        self.session(session_id).await?.release_lock(package)?;
        Ok(())
    }

    /// Clear a session's display queues, lock and active display
    pub async fn reset_display(&self, session_id: SessionId) -> Result<()> {
        self.session(session_id).await?.reset_display()?;
        Ok(())
    }

    pub async fn snapshot(&self, session_id: SessionId) -> Result<SessionSnapshot> {
        Ok(self.sessions.snapshot(session_id).await?)
    }

    /// End a session now and forget its registry associations
    pub async fn end_session(&self, session_id: SessionId) -> bool {
        let ended = self.sessions.end_session(session_id).await;
        self.servers.dissociate_session(session_id).await;
        ended
    }

    /// End sessions whose grace period has run out
    pub async fn cleanup_sessions(&self) -> Vec<SessionId> {
        cleanup_sessions(&self.sessions, &self.servers).await
    }

    /// Register an app server
    pub async fn register_server(
        &self,
        package: impl Into<PackageName>,
        credential: &str,
        webhook_url: &str,
        server_urls: Vec<String>,
    ) -> Result<RegistrationId> {
        Ok(self
            .servers
            .register(package.into(), credential, webhook_url, server_urls)
            .await?)
    }

    pub async fn heartbeat(&self, registration_id: RegistrationId) -> Result<()> {
        Ok(self.servers.heartbeat(registration_id).await?)
    }

    /// Tell a restarted app server about the sessions it was serving
    ///
    /// One notification per live session is delivered in the background with
    /// bounded retries. Returns how many were dispatched.
    pub async fn notify_restart(&self, registration_id: RegistrationId, credential: &str) -> Result<usize> {
        let target = self.servers.notify_restart(registration_id, credential).await?;
        let mut dispatched = 0;

        for session_id in target.session_ids {
            let Some(user_id) = self.sessions.user_of(session_id).await else {
                tracing::debug!(session_id = %session_id, "Session gone, recovery skipped");
                continue;
            };

            let notification = RecoveryNotification {
                session_id,
                user_id,
                package_name: target.package.clone(),
                connection_url: self.config.public_url.clone(),
            };
            self.spawn_delivery(target.webhook_url.clone(), notification);
            dispatched += 1;
        }

        tracing::info!(
            registration_id = %registration_id,
            package = %target.package,
            sessions = dispatched,
            "Recovery notifications dispatched"
        );

        Ok(dispatched)
    }

    /// Run background maintenance until `shutdown` resolves, then end every
    /// session
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let registry_cleanup = self.servers.spawn_cleanup_task();
        let session_cleanup = self.spawn_session_cleanup_task();
        tracing::info!(public_url = %self.config.public_url, "Hub running");

        shutdown.await;
        tracing::info!("Shutdown signal received");

        registry_cleanup.abort();
        session_cleanup.abort();

        for id in self.sessions.shutdown_all().await {
            self.servers.dissociate_session(id).await;
        }
    }

    /// Spawn the task that sweeps expired sessions
    pub fn spawn_session_cleanup_task(&self) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let servers = Arc::clone(&self.servers);
        let interval = self.config.session_cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cleanup_sessions(&sessions, &servers).await;
            }
        })
    }

    async fn session(&self, id: SessionId) -> Result<SessionHandle> {
        self.sessions
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id).into())
    }

    fn spawn_delivery(&self, webhook_url: String, notification: RecoveryNotification) -> JoinHandle<bool> {
        let handler = Arc::clone(&self.handler);
        let attempts = self.config.recovery_max_attempts;
        let delay = self.config.recovery_retry_delay;

        tokio::spawn(async move {
            for attempt in 1..=attempts {
                match handler.deliver_recovery(&webhook_url, &notification).await {
                    Ok(()) => {
                        tracing::debug!(
                            session_id = %notification.session_id,
                            package = %notification.package_name,
                            attempt = attempt,
                            "Recovery notification delivered"
                        );
                        return true;
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = %notification.session_id,
                            webhook = %webhook_url,
                            attempt = attempt,
                            error = %e,
                            "Recovery delivery failed"
                        );
                        if attempt < attempts {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }

            tracing::warn!(
                session_id = %notification.session_id,
                package = %notification.package_name,
                "Recovery notification abandoned"
            );
            false
        })
    }
}

async fn cleanup_sessions(sessions: &SessionManager, servers: &ServerRegistry) -> Vec<SessionId> {
    let ended = sessions.cleanup().await;
    for id in &ended {
        servers.dissociate_session(*id).await;
    }
    ended
}

fn reject_glasses(conn: &ConnectionHandle<GlassesOutbound>, message: &str) {
    let _ = conn.send(GlassesOutbound::ConnectionError {
        message: message.to_owned(),
    });
    conn.close();
}

fn reject_app(conn: &ConnectionHandle<AppOutbound>, message: &str) {
    let _ = conn.send(AppOutbound::ConnectionError {
        message: message.to_owned(),
    });
    conn.close();
}
