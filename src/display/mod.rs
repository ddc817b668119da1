//! Display scheduling
//!
//! Arbitrates the single display surface of the glasses between the apps of
//! one session.
//!
//! Rules, in the order a request meets them:
//!
//! - Validation: malformed requests are rejected and never queued
//! - Background lock: one background app owns the display until it
//!   releases, stops, or another background app forces it away
//! - Boot: while the boot screen shows, requests wait in a single slot
//!   where the newest wins
//! - Throttle: each app shows at most once per interval; extra requests wait
//!   in a per-app slot where the newest wins
//! - Override: system apps bypass lock and throttle and return the display
//!   to whatever they covered when they finish

pub mod config;
pub mod history;
pub mod request;
pub mod scheduler;
pub mod timers;

pub use config::DisplayConfig;
pub use history::{DisplayHistory, HistoryEntry, ShowCause};
pub use request::{DisplayRequest, Layout, ValidationError, View};
pub use scheduler::{
    ActiveDisplay, AppKind, DisplayError, DisplayOutcome, DisplayPhase, DisplayScheduler, DisplayUpdate,
    QueueReason, StartOutcome,
};
pub use timers::{TimerKind, Timers};
