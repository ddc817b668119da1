//! Session lifecycle
//!
//! One session per connected user. A session is created on the first
//! authenticated glasses handshake, survives app reconnects and glasses
//! drop-outs shorter than the grace period, and is torn down after that.
//!
//! # Architecture
//!
//! ```text
//!                      Arc<SessionManager>
//!              ┌─────────────────────────────────┐
//!              │ sessions: HashMap<SessionId,    │
//!              │   SessionHandle ──mpsc──┐       │
//!              │ >                       │       │
//!              └─────────────────────────┼───────┘
//!                                        ▼
//!                             session task (one per user)
//!                          ┌──────────────────────────────┐
//!                          │ Session {                    │
//!                          │   ConnectionRegistry,        │
//!                          │   SubscriptionRouter,        │
//!                          │   DisplayScheduler + timers, │
//!                          │ }                            │
//!                          └──────────────────────────────┘
//! ```
//!
//! Different sessions run fully in parallel; within a session every message
//! and timer is handled sequentially by its task.

pub mod actor;
pub mod error;
pub mod manager;
pub mod snapshot;
pub mod state;

pub use actor::{SessionCommand, SessionHandle};
pub use error::SessionError;
pub use manager::SessionManager;
pub use snapshot::SessionSnapshot;
pub use state::Session;
