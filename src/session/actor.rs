//! Session task
//!
//! Each session runs as one tokio task that owns its [`Session`] and applies
//! commands in arrival order. Scheduler timers are serviced by the same task:
//! it sleeps until the earliest deadline, so a timer callback can never race
//! a message handler of the same session, and a finished task leaves no timer
//! behind.
//!
//! ```text
//!   SessionHandle ──cmd──► mpsc ──► run loop ──► Session ──► connections
//!                                     ▲   │
//!                                     └───┘ sleep_until(next deadline)
//! ```

use std::future;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::SessionError;
use super::snapshot::SessionSnapshot;
use super::state::Session;
use crate::connection::ConnectionHandle;
use crate::protocol::{AppMessage, AppOutbound, GlassesMessage, GlassesOutbound, PackageName, SessionId, UserId};

/// Command applied by the session task
#[derive(Debug)]
pub enum SessionCommand {
    AttachGlasses(ConnectionHandle<GlassesOutbound>),
    /// The glasses connection with this id closed
    GlassesDisconnected {
        connection_id: u64,
    },
    AttachApp {
        package: PackageName,
        handle: ConnectionHandle<AppOutbound>,
    },
    /// The app connection with this id closed
    DetachApp {
        package: PackageName,
        connection_id: u64,
    },
    Glasses(GlassesMessage),
    App {
        package: PackageName,
        message: AppMessage,
    },
    ReleaseLock {
        package: PackageName,
    },
    ResetDisplay,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Cloneable address of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    user_id: UserId,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Whether the session task has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a command; never waits
    pub fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(cmd).map_err(|_| SessionError::Closed(self.id))
    }

    pub fn attach_glasses(&self, handle: ConnectionHandle<GlassesOutbound>) -> Result<(), SessionError> {
        self.send(SessionCommand::AttachGlasses(handle))
    }

    pub fn glasses_disconnected(&self, connection_id: u64) -> Result<(), SessionError> {
        self.send(SessionCommand::GlassesDisconnected { connection_id })
    }

    pub fn attach_app(&self, package: PackageName, handle: ConnectionHandle<AppOutbound>) -> Result<(), SessionError> {
        self.send(SessionCommand::AttachApp { package, handle })
    }

    pub fn detach_app(&self, package: PackageName, connection_id: u64) -> Result<(), SessionError> {
        self.send(SessionCommand::DetachApp { package, connection_id })
    }

    pub fn glasses_message(&self, message: GlassesMessage) -> Result<(), SessionError> {
        self.send(SessionCommand::Glasses(message))
    }

    pub fn app_message(&self, package: PackageName, message: AppMessage) -> Result<(), SessionError> {
        self.send(SessionCommand::App { package, message })
    }

    pub fn release_lock(&self, package: PackageName) -> Result<(), SessionError> {
        self.send(SessionCommand::ReleaseLock { package })
    }

    pub fn reset_display(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ResetDisplay)
    }

    /// Ask the session task for a snapshot of its state
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx))?;
        rx.await.map_err(|_| SessionError::Closed(self.id))
    }

    /// Stop the session task; it tears the session down before exiting
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown)
    }
}

/// Spawn the task that owns `session`
pub fn spawn(session: Session) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        id: session.id,
        user_id: session.user_id.clone(),
        tx,
    };
    let task = tokio::spawn(run(session, rx));
    (handle, task)
}

async fn run(mut session: Session, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
    tracing::debug!(session_id = %session.id, "Session task started");

    loop {
        let deadline = session.next_deadline();

        tokio::select! {
            biased;

            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                // timers that are already due fire before the command is seen
                session.poll_timers(Instant::now());
                session.flush_display();
                if !apply(&mut session, cmd) {
                    break;
                }
            }
            _ = sleep_until(deadline) => {
                session.poll_timers(Instant::now());
            }
        }

        session.flush_display();
    }

    session.teardown();
    tracing::debug!(session_id = %session.id, "Session task stopped");
}

/// Apply one command; returns false when the task should stop
fn apply(session: &mut Session, cmd: SessionCommand) -> bool {
    let now = Instant::now();

    match cmd {
        SessionCommand::AttachGlasses(handle) => session.attach_glasses(handle),
        SessionCommand::GlassesDisconnected { connection_id } => {
            session.glasses_disconnected(connection_id, now);
        }
        SessionCommand::AttachApp { package, handle } => session.attach_app(package, handle),
        SessionCommand::DetachApp { package, connection_id } => {
            session.detach_app(&package, connection_id);
        }
        SessionCommand::Glasses(message) => session.handle_glasses(message, now),
        SessionCommand::App { package, message } => {
            if let Err(e) = session.handle_app(&package, message, now) {
                tracing::warn!(session_id = %session.id, package = %package, error = %e, "App message rejected");
            }
        }
        SessionCommand::ReleaseLock { package } => {
            session.release_lock(&package);
        }
        SessionCommand::ResetDisplay => session.reset_display(),
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(session.snapshot());
        }
        SessionCommand::Shutdown => return false,
    }

    true
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::display::{AppKind, DisplayConfig, DisplayPhase};
    use crate::protocol::Subscription;
    use crate::server::StaticPolicy;

    fn spawn_session() -> (SessionHandle, JoinHandle<()>, UnboundedReceiver<GlassesOutbound>) {
        let policy = StaticPolicy::new()
            .app("com.a", "ka", AppKind::Standard, [Subscription::All])
            .app("com.bg", "kbg", AppKind::Background, [Subscription::All]);
        let session = Session::new(SessionId::new(), "user-1".into(), DisplayConfig::default(), Arc::new(policy));
        let (handle, task) = spawn(session);

        let (glasses, rx) = ConnectionHandle::channel();
        handle.attach_glasses(glasses).unwrap();
        (handle, task, rx)
    }

    fn display_request(package: &str, text: &str) -> AppMessage {
        AppMessage::parse(
            &serde_json::json!({
                "type": "display_request",
                "packageName": package,
                "view": "main",
                "layout": {"layoutType": "text_wall", "text": text}
            })
            .to_string(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_timer_fires_inside_task() {
        let (handle, _task, _rx) = spawn_session();

        handle
            .glasses_message(GlassesMessage::StartApp { package_name: "com.a".into() })
            .unwrap();
        handle
            .app_message("com.a".into(), display_request("com.a", "Hello"))
            .unwrap();

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, DisplayPhase::Booting);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, DisplayPhase::Active);
        assert_eq!(snap.active_text(), Some("Hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_no_timer_behind() {
        let (handle, task, mut rx) = spawn_session();

        handle
            .glasses_message(GlassesMessage::StartApp { package_name: "com.a".into() })
            .unwrap();
        let _ = handle.snapshot().await.unwrap();
        handle.shutdown().unwrap();
        task.await.unwrap();

        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(rx.try_recv().is_err());
        assert!(handle.is_closed());
        assert_eq!(handle.snapshot().await.unwrap_err(), SessionError::Closed(handle.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_shutdown_fail() {
        let (handle, task, _rx) = spawn_session();
        handle.shutdown().unwrap();
        task.await.unwrap();

        assert!(matches!(handle.reset_display(), Err(SessionError::Closed(_))));
    }
}
