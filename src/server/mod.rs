//! Hub server
//!
//! [`Hub`] is the facade the transport layer talks to. It authenticates
//! connections through a [`HubHandler`], owns the [`SessionManager`] and
//! [`ServerRegistry`], and runs their background sweeps.
//!
//! [`SessionManager`]: crate::session::SessionManager
//! [`ServerRegistry`]: crate::registry::ServerRegistry

pub mod config;
pub mod handler;
pub mod hub;

pub use config::HubConfig;
pub use handler::{AccessPolicy, HubHandler, RecoveryNotification, StaticPolicy};
pub use hub::Hub;
