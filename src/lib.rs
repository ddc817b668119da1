//! Per-session multiplexer for smart-glasses apps
//!
//! One user's glasses expose a single display, a stream of sensor and phone
//! events, and a handful of controls. Many independently developed apps want
//! all of them at once. `tpa-hub` keeps one session per connected user and,
//! inside it:
//!
//! - routes typed events from the glasses to exactly the apps subscribed to
//!   them ([`subscription`])
//! - arbitrates the exclusive display between apps with boot sequencing,
//!   per-app throttling, a background lock and system override ([`display`])
//! - keeps the session coherent across app reconnects, glasses drop-outs and
//!   app-server restarts ([`session`], [`registry`])
//!
//! Transport framing, authentication and permission storage are supplied by
//! the embedding application through [`server::HubHandler`].
//!
//! # Example
//!
//! ```ignore
//! use tpa_hub::{Hub, HubConfig, ConnectionHandle};
//!
//! let hub = Hub::new(HubConfig::default(), MyHandler::new());
//!
//! let (glasses, glasses_rx) = ConnectionHandle::channel();
//! let session_id = hub
//!     .connect_glasses(r#"{"type":"connection_init","coreToken":"..."}"#, glasses)
//!     .await?;
//! hub.handle_glasses_message(session_id, r#"{"type":"start_app","packageName":"com.example.notes"}"#)
//!     .await?;
//! ```

pub mod connection;
pub mod display;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod subscription;

pub use connection::ConnectionHandle;
pub use display::{AppKind, DisplayConfig, DisplayPhase};
pub use error::{Error, Result};
pub use protocol::{AppOutbound, GlassesOutbound, PackageName, RegistrationId, SessionId, StreamType, Subscription};
pub use registry::RegistryConfig;
pub use server::{AccessPolicy, Hub, HubConfig, HubHandler, RecoveryNotification, StaticPolicy};
pub use session::SessionSnapshot;
