//! Subscription routing
//!
//! Routes typed events from the glasses to exactly the apps that declared
//! interest in them.
//!
//! ```text
//!   by_app:    com.a ──► {button_press, vad}
//!              com.b ──► {*}
//!
//!   by_stream: button_press ──► {com.a}
//!              vad          ──► {com.a}
//!   wildcard:  {com.b}
//!
//!   resolve(vad) = by_stream[vad] ∪ wildcard = {com.a, com.b}
//! ```
//!
//! Resolution is a single hash lookup plus the wildcard set. Broadcasting
//! encodes the payload once into `bytes::Bytes` and hands every recipient a
//! reference-counted clone.

pub mod router;

pub use router::{BroadcastReport, RejectReason, SubscriptionRejection, SubscriptionRouter, UpdateReport};
