//! Session snapshot
//!
//! Read-only copy of a session's state, taken inside the session task and
//! handed out through [`SessionHandle::snapshot`](super::SessionHandle::snapshot).

use tokio::time::Instant;

use crate::display::{ActiveDisplay, DisplayPhase, HistoryEntry};
use crate::protocol::{PackageName, SessionId, UserId};
use crate::stats::{DisplayMetrics, SessionStats};

/// Point-in-time view of one session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Session ID
    pub session_id: SessionId,

    /// Owner of the session
    pub user_id: UserId,

    /// When the session was created
    pub created_at: Instant,

    /// When the glasses connection was lost, if it currently is
    pub disconnected_at: Option<Instant>,

    /// Display scheduler phase
    pub phase: DisplayPhase,

    /// What is on screen
    pub active: Option<ActiveDisplay>,

    /// Running apps
    pub active_apps: Vec<PackageName>,

    /// Apps whose boot screen is showing
    pub loading_apps: Vec<PackageName>,

    /// Holder of the background lock
    pub lock_holder: Option<PackageName>,

    /// Recent displays, oldest first
    pub history: Vec<HistoryEntry>,

    /// Display request counters
    pub metrics: DisplayMetrics,

    /// Routing counters
    pub stats: SessionStats,

    /// Whether the glasses connection is open
    pub glasses_connected: bool,

    /// Apps with an attached connection
    pub connected_apps: Vec<PackageName>,

    /// Apps with at least one subscription
    pub subscribed_apps: usize,
}

impl SessionSnapshot {
    /// Text of the active display, if it is a text wall
    pub fn active_text(&self) -> Option<&str> {
        self.active.as_ref().and_then(|a| a.request.layout.text())
    }

    /// Owner of the active display
    pub fn active_owner(&self) -> Option<&PackageName> {
        self.active.as_ref().map(|a| &a.request.package_name)
    }

    pub fn is_running(&self, package: &str) -> bool {
        self.active_apps.iter().any(|p| p.as_str() == package)
    }
}
