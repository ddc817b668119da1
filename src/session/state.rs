//! Per-session state and message dispatch
//!
//! A [`Session`] owns everything mutable about one user's connection: the
//! connection registry, subscription tables, and display scheduler. Nothing
//! here is shared between sessions. All methods take `&mut self` and are only
//! ever called from the session's own task, one at a time.

use std::sync::Arc;

use tokio::time::Instant;

use super::snapshot::SessionSnapshot;
use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::display::{DisplayConfig, DisplayError, DisplayOutcome, DisplayScheduler, DisplayUpdate};
use crate::protocol::{
    AppMessage, AppOutbound, DisplayEvent, GlassesMessage, GlassesOutbound, PackageName, ProtocolError,
    SessionId, StreamEvent, UserId,
};
use crate::server::AccessPolicy;
use crate::stats::SessionStats;
use crate::subscription::SubscriptionRouter;

/// Reason sent with `app_stopped` when the user stops an app
pub const STOPPED_BY_USER: &str = "stopped";
/// Reason sent with `app_stopped` when a standard app is replaced
pub const DISPLACED: &str = "displaced";
/// Reason sent with `app_stopped` when the session ends
pub const SESSION_ENDED: &str = "session_ended";

/// State of one user's session
pub struct Session {
    /// Session ID
    pub id: SessionId,

    /// User the session belongs to
    pub user_id: UserId,

    /// Creation time
    pub created_at: Instant,

    /// Set while the glasses are disconnected
    pub disconnected_at: Option<Instant>,

    connections: ConnectionRegistry,
    router: SubscriptionRouter,
    scheduler: DisplayScheduler,
    policy: Arc<dyn AccessPolicy>,
    stats: SessionStats,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("phase", &self.scheduler.phase())
            .field("apps", &self.connections.app_count())
            .finish()
    }
}

impl Session {
    pub fn new(
        id: SessionId,
        user_id: UserId,
        display_config: DisplayConfig,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            id,
            user_id,
            created_at: Instant::now(),
            disconnected_at: None,
            connections: ConnectionRegistry::new(),
            router: SubscriptionRouter::new(),
            scheduler: DisplayScheduler::new(display_config),
            policy,
            stats: SessionStats::new(),
        }
    }

    pub fn scheduler(&self) -> &DisplayScheduler {
        &self.scheduler
    }

    pub fn router(&self) -> &SubscriptionRouter {
        &self.router
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Earliest scheduler deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Attach (or re-attach) the glasses and resync them
    ///
    /// The ack lists running apps; whatever is on screen is sent again.
    pub fn attach_glasses(&mut self, handle: ConnectionHandle<GlassesOutbound>) {
        let reconnect = self.disconnected_at.take().is_some();
        self.connections.set_glasses(handle);

        tracing::info!(
            session_id = %self.id,
            user_id = %self.user_id,
            reconnect = reconnect,
            "Glasses attached"
        );

        self.resync_glasses();
    }

    /// Record that the glasses connection `connection_id` dropped
    ///
    /// Ignored when the glasses have already reconnected on another
    /// connection; returns whether the session is now disconnected.
    pub fn glasses_disconnected(&mut self, connection_id: u64, now: Instant) -> bool {
        if !self.connections.clear_glasses_if(connection_id) {
            tracing::debug!(
                session_id = %self.id,
                connection_id = connection_id,
                "Ignoring close of replaced glasses connection"
            );
            return false;
        }
        if self.disconnected_at.is_none() {
            self.disconnected_at = Some(now);
        }
        tracing::info!(session_id = %self.id, connection_id = connection_id, "Glasses disconnected");
        true
    }

    /// Attach an app connection and acknowledge it
    ///
    /// Does not start the app; only `start_app` from the glasses does that.
    pub fn attach_app(&mut self, package: PackageName, handle: ConnectionHandle<AppOutbound>) {
        if let Err(e) = handle.send(AppOutbound::ConnectionAck { session_id: self.id }) {
            tracing::warn!(session_id = %self.id, package = %package, error = %e, "Failed to ack app");
        }
        self.connections.attach_app(package.clone(), handle);
        tracing::info!(session_id = %self.id, package = %package, "App attached");
    }

    /// Close an app connection without stopping the app
    ///
    /// Subscriptions and scheduler state survive so a reconnecting app picks
    /// up where it left off. A close from a connection the app has already
    /// replaced is ignored.
    pub fn detach_app(&mut self, package: &PackageName, connection_id: u64) -> bool {
        let detached = self.connections.detach_app_if(package.as_str(), connection_id);
        if detached {
            tracing::info!(session_id = %self.id, package = %package, connection_id = connection_id, "App detached");
        } else {
            tracing::debug!(
                session_id = %self.id,
                package = %package,
                connection_id = connection_id,
                "Ignoring close of replaced app connection"
            );
        }
        detached
    }

    /// Dispatch a message from the glasses
    pub fn handle_glasses(&mut self, message: GlassesMessage, now: Instant) {
        self.stats.glasses_messages += 1;

        match message {
            GlassesMessage::ConnectionInit { .. } => self.resync_glasses(),
            GlassesMessage::StartApp { package_name } => self.start_app(package_name, now),
            GlassesMessage::StopApp { package_name } => self.stop_app(&package_name, now),
            GlassesMessage::Event(event) => self.route_event(&event),
        }
    }

    /// Dispatch a message from an app connection bound to `package`
    ///
    /// A malformed display request is answered with `display_rejected`.
    /// Throttled, queued and blocked requests are normal outcomes: they are
    /// not reported to the app and show up only in the scheduler metrics of
    /// [`Session::snapshot`].
    pub fn handle_app(&mut self, package: &PackageName, message: AppMessage, now: Instant) -> Result<(), ProtocolError> {
        message.ensure_from(package)?;
        self.stats.app_messages += 1;

        match message {
            AppMessage::ConnectionInit { .. } => {
                self.send_to_app(package, AppOutbound::ConnectionAck { session_id: self.id });
            }
            AppMessage::SubscriptionUpdate { subscriptions, .. } => {
                let policy = Arc::clone(&self.policy);
                let report = self
                    .router
                    .update(package, &subscriptions, |sub| policy.is_permitted(package, sub));

                if !report.rejected.is_empty() {
                    self.send_to_app(
                        package,
                        AppOutbound::SubscriptionError {
                            rejected: report.rejected,
                        },
                    );
                }
            }
            AppMessage::DisplayRequest { payload, .. } => {
                match self.scheduler.handle_request(package.clone(), &payload, now) {
                    Ok(DisplayOutcome::Blocked { holder }) => {
                        tracing::debug!(
                            session_id = %self.id,
                            package = %package,
                            holder = %holder,
                            "Display blocked by background lock"
                        );
                    }
                    Ok(_) => {}
                    Err(DisplayError::Invalid(e)) => {
                        self.send_to_app(package, AppOutbound::DisplayRejected { reason: e.to_string() });
                    }
                    Err(DisplayError::NotRunning(_)) => {
                        tracing::debug!(
                            session_id = %self.id,
                            package = %package,
                            "Display request from app that is not running"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Start an app on the glasses
    pub fn start_app(&mut self, package: PackageName, now: Instant) {
        let kind = self.policy.app_kind(&package);
        let outcome = self.scheduler.start_app(package, kind, now);

        if let Some(displaced) = outcome.displaced {
            self.release_app(&displaced, DISPLACED);
        }
        if outcome.started {
            self.send_app_state();
        }
    }

    /// Stop an app on the glasses
    pub fn stop_app(&mut self, package: &PackageName, now: Instant) {
        if !self.scheduler.stop_app(package, now) {
            tracing::debug!(session_id = %self.id, package = %package, "Stop for app that is not running");
            return;
        }
        self.release_app(package, STOPPED_BY_USER);
        self.send_app_state();
    }

    /// Release the background lock held by `package`
    pub fn release_lock(&mut self, package: &PackageName) -> bool {
        self.scheduler.release_lock(package)
    }

    /// Clear the display scheduler's queues, lock and active display
    pub fn reset_display(&mut self) {
        self.scheduler.reset();
    }

    /// Fire due scheduler timers
    pub fn poll_timers(&mut self, now: Instant) {
        self.scheduler.poll_timers(now);
    }

    /// Send pending screen changes to the glasses
    pub fn flush_display(&mut self) {
        for update in self.scheduler.take_updates() {
            let event = match update {
                DisplayUpdate::Show(request) => DisplayEvent::from_request(&request),
                DisplayUpdate::Clear(view) => DisplayEvent::blank(&self.scheduler.config().system_package, view),
            };

            match self.connections.send_to_glasses(GlassesOutbound::DisplayEvent(event)) {
                Ok(()) => self.stats.display_updates += 1,
                Err(e) => {
                    tracing::debug!(session_id = %self.id, error = %e, "Display update not delivered");
                }
            }
        }
    }

    /// Tear down: notify apps, close connections, drop all state
    pub fn teardown(&mut self) {
        let apps: Vec<PackageName> = self.connections.app_packages().cloned().collect();
        for package in &apps {
            self.send_to_app(
                package,
                AppOutbound::AppStopped {
                    reason: SESSION_ENDED.into(),
                },
            );
        }

        self.scheduler.shutdown();
        self.router.clear();
        self.connections.close_all();

        tracing::info!(session_id = %self.id, user_id = %self.user_id, "Session torn down");
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            disconnected_at: self.disconnected_at,
            phase: self.scheduler.phase(),
            active: self.scheduler.active().cloned(),
            active_apps: self.scheduler.active_apps(),
            loading_apps: self.scheduler.loading_apps(),
            lock_holder: self.scheduler.lock_holder().cloned(),
            history: self.scheduler.history().iter().cloned().collect(),
            metrics: self.scheduler.metrics().clone(),
            stats: self.stats,
            glasses_connected: self.connections.glasses_connected(),
            connected_apps: self.connections.app_packages().cloned().collect(),
            subscribed_apps: self.router.app_count(),
        }
    }

    fn route_event(&mut self, event: &StreamEvent) {
        let report = self.router.broadcast(event, &self.connections);
        self.stats.events_routed += 1;
        self.stats.events_delivered += report.delivered as u64;
        self.stats.delivery_failures += report.failed as u64;
    }

    /// Drop an app's subscriptions and tell it it has been stopped
    fn release_app(&mut self, package: &PackageName, reason: &str) {
        self.router.remove(package);
        self.send_to_app(
            package,
            AppOutbound::AppStopped {
                reason: reason.to_owned(),
            },
        );
        self.connections.detach_app(package.as_str());
    }

    fn resync_glasses(&mut self) {
        let ack = GlassesOutbound::ConnectionAck {
            session_id: self.id,
            active_app_package_names: self.scheduler.active_apps(),
        };
        if let Err(e) = self.connections.send_to_glasses(ack) {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to ack glasses");
            return;
        }

        if let Some(active) = self.scheduler.active() {
            let event = DisplayEvent::from_request(&active.request);
            if self
                .connections
                .send_to_glasses(GlassesOutbound::DisplayEvent(event))
                .is_ok()
            {
                self.stats.display_updates += 1;
            }
        }
    }

    fn send_app_state(&self) {
        let msg = GlassesOutbound::AppStateChange {
            active_app_package_names: self.scheduler.active_apps(),
            loading_apps: self.scheduler.loading_apps(),
        };
        if let Err(e) = self.connections.send_to_glasses(msg) {
            tracing::debug!(session_id = %self.id, error = %e, "App state change not delivered");
        }
    }

    fn send_to_app(&self, package: &PackageName, msg: AppOutbound) {
        let tag = msg.type_tag();
        if let Err(e) = self.connections.send_to_app(package.as_str(), msg) {
            tracing::debug!(
                session_id = %self.id,
                package = %package,
                message = tag,
                error = %e,
                "App message not delivered"
            );
        }
    }
}
