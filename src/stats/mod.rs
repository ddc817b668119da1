//! Counters for display arbitration and event routing

pub mod metrics;

pub use metrics::{AppDisplayCounts, DisplayMetrics, SessionStats};
