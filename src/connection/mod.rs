//! Connection registry
//!
//! Tracks the live connection handles of one session: a single glasses
//! device and any number of apps. Exposes send / close / is-open and nothing
//! about the transport underneath.

pub mod error;
pub mod handle;
pub mod registry;

pub use error::ConnectionError;
pub use handle::ConnectionHandle;
pub use registry::{AppConnection, ConnectionRegistry};
