//! Server registry for app-server recovery
//!
//! App servers register with a credential and a webhook, then heartbeat.
//! When an app attaches to a session the session is associated with its
//! package's registrations; after a server restarts, `notify_restart` lists
//! the sessions it should rejoin.
//!
//! # Lifecycle
//!
//! ```text
//!   register ──► Active ──heartbeat──► Active
//!                  │
//!                  │ no heartbeat for interval × missed
//!                  ▼
//!               Inactive ──removal_after──► removed
//!                  │
//!                  └─ notify_restart → Expired (no dispatch)
//! ```
//!
//! Registrations only hold session ids, never session state; a registration
//! going inactive does not affect the sessions it was serving.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{hash_credential, RegistrationState, RegistrationStats, ServerRegistration};
pub use error::RegistryError;
pub use store::{RecoveryTarget, ServerRegistry};
