//! Logical message taxonomy
//!
//! The hub speaks to two kinds of peers over already-authenticated
//! connections:
//!
//! ```text
//!   glasses ──connection_init / start_app / stop_app / <stream events>──► hub
//!   glasses ◄──connection_ack / display_event / app_state_change─────────  hub
//!   app     ──connection_init / subscription_update / display_request───► hub
//!   app     ◄──connection_ack / data_stream / app_stopped / errors───────  hub
//! ```
//!
//! Inbound envelopes are parsed into closed sum types so dispatch is
//! exhaustive; unrecognised type tags are errors, never best-effort guesses.

pub mod error;
pub mod ids;
pub mod inbound;
pub mod outbound;
pub mod stream;

pub use error::ProtocolError;
pub use ids::{now_ms, PackageName, RegistrationId, SessionId, UserId};
pub use inbound::{AppMessage, GlassesMessage, StreamEvent};
pub use outbound::{AppOutbound, DisplayEvent, GlassesOutbound};
pub use stream::{StreamType, Subscription};
