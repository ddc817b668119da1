//! Display arbitration state machine
//!
//! One scheduler per session decides which app's request occupies the single
//! display surface. It is sans-IO: every operation takes the current time,
//! timers are deadlines in [`Timers`], and screen changes are queued as
//! [`DisplayUpdate`]s for the session to send.
//!
//! ```text
//!            start_app                    boot deadline
//!   Idle ───────────────► Booting ───────────────────────► Active / Idle
//!    ▲                      │  requests → boot slot          │
//!    │                      │  (newest wins)                 │
//!    │     auto-clear /     ▼                                │
//!    └──── stop owner ◄─ Active ◄──── show (lock, throttle) ◄┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;

use super::config::DisplayConfig;
use super::history::{DisplayHistory, HistoryEntry, ShowCause};
use super::request::{DisplayRequest, Layout, ValidationError, View};
use super::timers::{TimerKind, Timers};
use crate::protocol::PackageName;
use crate::stats::DisplayMetrics;

/// Scheduling class of an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppKind {
    /// Foreground app; at most one runs per session
    Standard,
    /// Background app; competes for the background lock
    Background,
    /// System/core app; overrides throttle and lock
    System,
}

/// Scheduler phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayPhase {
    /// Nothing on screen
    Idle,
    /// Boot screen is showing
    Booting,
    /// An app's request is on screen
    Active,
}

/// The request currently occupying the display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDisplay {
    pub request: DisplayRequest,
    pub started_at: Instant,
    pub expires_at: Option<Instant>,
}

/// Why an accepted request is not on screen yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueReason {
    /// Held in the boot slot until the boot screen ends
    Booting,
    /// Held in the app's throttle slot until its interval lapses
    Throttled,
    /// A system app holds the display; shown when it lets go
    Overridden,
}

/// Result of a display request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayOutcome {
    /// On screen now
    Shown,
    /// Accepted and waiting
    Queued(QueueReason),
    /// Refused: another background app holds the lock
    Blocked { holder: PackageName },
}

/// Error for a display request that never entered any queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayError {
    #[error("invalid display request: {0}")]
    Invalid(#[from] ValidationError),
    #[error("app {0} is not running")]
    NotRunning(PackageName),
}

/// Screen change for the glasses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayUpdate {
    Show(DisplayRequest),
    Clear(View),
}

/// Result of [`DisplayScheduler::start_app`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOutcome {
    /// False if the app was already running
    pub started: bool,
    /// Standard app stopped to make room for this one
    pub displaced: Option<PackageName>,
}

/// A display taken off screen that may come back
#[derive(Debug, Clone)]
struct SavedDisplay {
    request: DisplayRequest,
    remaining: Option<Duration>,
}

impl SavedDisplay {
    fn capture(active: ActiveDisplay, now: Instant) -> Self {
        let remaining = active
            .expires_at
            .map(|at| at.saturating_duration_since(now));
        Self {
            request: active.request,
            remaining,
        }
    }
}

/// Per-session display arbitration
#[derive(Debug)]
pub struct DisplayScheduler {
    config: DisplayConfig,
    phase: DisplayPhase,
    active: Option<ActiveDisplay>,
    running: BTreeMap<PackageName, AppKind>,
    loading: BTreeSet<PackageName>,
    boot_slot: Option<DisplayRequest>,
    throttle_slots: HashMap<PackageName, DisplayRequest>,
    last_shown: HashMap<PackageName, Instant>,
    background_lock: Option<PackageName>,
    pre_boot: Option<SavedDisplay>,
    pre_override: Option<SavedDisplay>,
    timers: Timers,
    history: DisplayHistory,
    metrics: DisplayMetrics,
    outbox: Vec<DisplayUpdate>,
}

impl DisplayScheduler {
    pub fn new(config: DisplayConfig) -> Self {
        let history = DisplayHistory::with_capacity(config.history_capacity);
        Self {
            config,
            phase: DisplayPhase::Idle,
            active: None,
            running: BTreeMap::new(),
            loading: BTreeSet::new(),
            boot_slot: None,
            throttle_slots: HashMap::new(),
            last_shown: HashMap::new(),
            background_lock: None,
            pre_boot: None,
            pre_override: None,
            timers: Timers::new(),
            history,
            metrics: DisplayMetrics::new(),
            outbox: Vec::new(),
        }
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    pub fn phase(&self) -> DisplayPhase {
        self.phase
    }

    pub fn active(&self) -> Option<&ActiveDisplay> {
        self.active.as_ref()
    }

    /// Running apps, sorted by package name
    pub fn active_apps(&self) -> Vec<PackageName> {
        self.running.keys().cloned().collect()
    }

    /// Apps whose boot screen is still showing
    pub fn loading_apps(&self) -> Vec<PackageName> {
        self.loading.iter().cloned().collect()
    }

    pub fn is_running(&self, package: &str) -> bool {
        self.running.contains_key(package)
    }

    pub fn app_kind(&self, package: &str) -> Option<AppKind> {
        self.running.get(package).copied()
    }

    pub fn lock_holder(&self) -> Option<&PackageName> {
        self.background_lock.as_ref()
    }

    /// Request waiting in the boot slot
    pub fn boot_queued(&self) -> Option<&DisplayRequest> {
        self.boot_slot.as_ref()
    }

    /// Request waiting in an app's throttle slot
    pub fn throttled(&self, package: &str) -> Option<&DisplayRequest> {
        self.throttle_slots.get(package)
    }

    pub fn history(&self) -> &DisplayHistory {
        &self.history
    }

    pub fn metrics(&self) -> &DisplayMetrics {
        &self.metrics
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// Earliest pending timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Drain screen changes produced since the last call
    pub fn take_updates(&mut self) -> Vec<DisplayUpdate> {
        std::mem::take(&mut self.outbox)
    }

    /// Start an app and show the boot screen
    ///
    /// Starting a standard app stops any other running standard app first.
    pub fn start_app(&mut self, package: PackageName, kind: AppKind, now: Instant) -> StartOutcome {
        if self.running.contains_key(&package) {
            tracing::debug!(package = %package, "App already running");
            return StartOutcome::default();
        }

        let mut displaced = None;
        if kind == AppKind::Standard {
            let other = self
                .running
                .iter()
                .find(|(_, k)| **k == AppKind::Standard)
                .map(|(p, _)| p.clone());

            if let Some(other) = other {
                tracing::info!(
                    package = %package,
                    displaced = %other,
                    "Standard app replaces running standard app"
                );
                self.stop_app(&other, now);
                displaced = Some(other);
            }
        }

        self.running.insert(package.clone(), kind);
        self.loading.insert(package.clone());
        self.begin_boot(now);

        tracing::info!(package = %package, kind = ?kind, "App started");

        StartOutcome {
            started: true,
            displaced,
        }
    }

    /// Stop an app and purge everything it owns
    ///
    /// Content of a stopped app is never shown again, even if it was saved
    /// behind a boot screen or an override.
    pub fn stop_app(&mut self, package: &PackageName, now: Instant) -> bool {
        let Some(kind) = self.running.remove(package) else {
            return false;
        };

        self.loading.remove(package);
        self.last_shown.remove(package);
        self.drop_throttle(package);

        if self.boot_slot.as_ref().is_some_and(|r| &r.package_name == package) {
            self.boot_slot = None;
        }
        if self.pre_boot.as_ref().is_some_and(|s| &s.request.package_name == package) {
            // a stopped override hands the screen back to what it covered,
            // which the end of the boot restores if its owner still runs
            self.pre_boot = match kind {
                AppKind::System => self.pre_override.take(),
                _ => None,
            };
        }
        if self.pre_override.as_ref().is_some_and(|s| &s.request.package_name == package) {
            self.pre_override = None;
        }
        if self.background_lock.as_ref() == Some(package) {
            self.background_lock = None;
            tracing::debug!(package = %package, "Background lock released on stop");
        }

        tracing::info!(package = %package, "App stopped");

        if self.phase == DisplayPhase::Booting {
            if self.loading.is_empty() {
                self.finish_boot(now);
            }
            return true;
        }

        let owns_active = self
            .active
            .as_ref()
            .is_some_and(|a| &a.request.package_name == package);

        if owns_active {
            let view = self.take_active();
            if !(kind == AppKind::System && self.restore_override(now)) {
                self.go_idle(view);
            }
        }

        true
    }

    /// Validate an app's raw payload and submit it
    pub fn handle_request(
        &mut self,
        package: PackageName,
        payload: &Map<String, Value>,
        now: Instant,
    ) -> Result<DisplayOutcome, DisplayError> {
        match DisplayRequest::from_payload(package.clone(), payload, now) {
            Ok(request) => self.submit(request, now),
            Err(e) => {
                self.metrics.record_request(&package);
                self.metrics.record_failed(&package);
                tracing::debug!(package = %package, error = %e, "Display request rejected");
                Err(e.into())
            }
        }
    }

    /// Submit a validated request
    pub fn submit(&mut self, request: DisplayRequest, now: Instant) -> Result<DisplayOutcome, DisplayError> {
        let package = request.package_name.clone();
        self.metrics.record_request(&package);

        let Some(kind) = self.running.get(&package).copied() else {
            self.metrics.record_failed(&package);
            tracing::debug!(package = %package, "Display request from app that is not running");
            return Err(DisplayError::NotRunning(package));
        };

        if let Some(holder) = self.blocking_holder(&request, kind) {
            self.metrics.record_blocked(&package);
            tracing::debug!(package = %package, holder = %holder, "Display request blocked");
            return Ok(DisplayOutcome::Blocked { holder });
        }

        if self.phase == DisplayPhase::Booting {
            self.hold_for_boot(request);
            return Ok(DisplayOutcome::Queued(QueueReason::Booting));
        }

        Ok(self.evaluate(request, now, ShowCause::Direct))
    }

    /// Release the background lock if `package` holds it
    pub fn release_lock(&mut self, package: &PackageName) -> bool {
        if self.background_lock.as_ref() == Some(package) {
            self.background_lock = None;
            tracing::debug!(package = %package, "Background lock released");
            true
        } else {
            false
        }
    }

    /// Fire every timer due at `now`, in deadline order
    pub fn poll_timers(&mut self, now: Instant) {
        while let Some((kind, at)) = self.timers.pop_due(now) {
            match kind {
                TimerKind::Boot => self.finish_boot(at),
                TimerKind::Throttle(package) => self.flush_throttle(package, at),
                TimerKind::AutoClear => self.auto_clear(at),
            }
        }
    }

    /// Clear queues, lock, timers and the active display
    ///
    /// Running apps stay running.
    pub fn reset(&mut self) {
        self.timers.clear();
        self.boot_slot = None;
        self.throttle_slots.clear();
        self.background_lock = None;
        self.pre_boot = None;
        self.pre_override = None;
        self.loading.clear();

        if let Some(active) = self.active.take() {
            self.outbox.push(DisplayUpdate::Clear(active.request.view));
        }
        self.phase = DisplayPhase::Idle;

        tracing::info!("Display scheduler reset");
    }

    /// Drop all state; used when the session ends
    pub fn shutdown(&mut self) {
        self.reset();
        self.running.clear();
        self.last_shown.clear();
        self.outbox.clear();
    }

    fn blocking_holder(&self, request: &DisplayRequest, kind: AppKind) -> Option<PackageName> {
        if kind != AppKind::Background || request.force_display {
            return None;
        }
        self.background_lock
            .as_ref()
            .filter(|holder| **holder != request.package_name)
            .cloned()
    }

    fn hold_for_boot(&mut self, request: DisplayRequest) {
        tracing::debug!(package = %request.package_name, "Display request held for boot");
        if let Some(prev) = self.boot_slot.replace(request) {
            tracing::debug!(package = %prev.package_name, "Boot slot entry superseded");
        }
    }

    /// Apply lock, throttle and override rules to a request outside boot
    fn evaluate(&mut self, request: DisplayRequest, now: Instant, cause: ShowCause) -> DisplayOutcome {
        let package = request.package_name.clone();
        let kind = self.running.get(&package).copied().unwrap_or(AppKind::Standard);

        if kind == AppKind::System {
            self.drop_throttle(&package);
            if !self.active_is_system() {
                if let Some(active) = self.active.take() {
                    self.timers.cancel(&TimerKind::AutoClear);
                    self.pre_override = Some(SavedDisplay::capture(active, now));
                }
            }
            let cause = if cause == ShowCause::Direct {
                ShowCause::Override
            } else {
                cause
            };
            self.show(request, now, cause);
            return DisplayOutcome::Shown;
        }

        if kind == AppKind::Background {
            match self.background_lock.as_ref() {
                Some(holder) if *holder == package => {}
                Some(holder) => {
                    if !request.force_display {
                        let holder = holder.clone();
                        self.metrics.record_blocked(&package);
                        return DisplayOutcome::Blocked { holder };
                    }
                    tracing::info!(from = %holder, to = %package, "Background lock transferred");
                    self.background_lock = Some(package.clone());
                }
                None => {
                    tracing::debug!(package = %package, "Background lock acquired");
                    self.background_lock = Some(package.clone());
                }
            }
        }

        if let Some(last) = self.last_shown.get(&package) {
            let ready_at = *last + self.config.throttle_interval;
            if now < ready_at {
                if let Some(prev) = self.throttle_slots.insert(package.clone(), request) {
                    tracing::trace!(package = %package, layout = prev.layout.kind(), "Throttle slot entry superseded");
                }
                self.timers
                    .schedule_if_absent(TimerKind::Throttle(package.clone()), ready_at);
                self.metrics.record_throttled(&package);
                tracing::debug!(package = %package, "Display request throttled");
                return DisplayOutcome::Queued(QueueReason::Throttled);
            }
        }

        // anything still waiting for this app is older than this request
        self.drop_throttle(&package);

        if self.active_is_system() {
            self.metrics
                .record_succeeded(&package, now.saturating_duration_since(request.submitted_at));
            let remaining = request.duration;
            self.pre_override = Some(SavedDisplay { request, remaining });
            tracing::debug!(package = %package, "Display request deferred behind override");
            return DisplayOutcome::Queued(QueueReason::Overridden);
        }

        self.show(request, now, cause);
        DisplayOutcome::Shown
    }

    fn begin_boot(&mut self, now: Instant) {
        if self.phase == DisplayPhase::Booting {
            // another app joins the boot already in progress
            let screen = self.boot_screen(now);
            self.put_on_screen(screen, now, None, ShowCause::BootScreen);
            return;
        }

        if let Some(active) = self.active.take() {
            self.timers.cancel(&TimerKind::AutoClear);
            self.pre_boot = Some(SavedDisplay::capture(active, now));
        }

        self.phase = DisplayPhase::Booting;
        let screen = self.boot_screen(now);
        self.put_on_screen(screen, now, None, ShowCause::BootScreen);
        self.timers
            .schedule(TimerKind::Boot, now + self.config.boot_duration);
    }

    fn finish_boot(&mut self, now: Instant) {
        self.timers.cancel(&TimerKind::Boot);
        self.loading.clear();
        self.active = None;
        self.phase = DisplayPhase::Idle;

        let saved = self.pre_boot.take();

        if let Some(request) = self.boot_slot.take() {
            if self.running.contains_key(&request.package_name) {
                if self.evaluate(request, now, ShowCause::BootFlush) == DisplayOutcome::Shown {
                    return;
                }
            }
        }

        if let Some(saved) = saved {
            if self.running.contains_key(&saved.request.package_name) {
                self.restore(saved, now);
                return;
            }
        }

        self.pre_override = None;
        self.go_idle(View::Main);
    }

    fn flush_throttle(&mut self, package: PackageName, now: Instant) {
        let Some(request) = self.throttle_slots.remove(&package) else {
            return;
        };
        if !self.running.contains_key(&package) {
            return;
        }

        if self.phase == DisplayPhase::Booting {
            self.hold_for_boot(request);
            return;
        }

        let outcome = self.evaluate(request, now, ShowCause::ThrottleFlush);
        tracing::debug!(package = %package, outcome = ?outcome, "Throttle slot flushed");
    }

    fn auto_clear(&mut self, now: Instant) {
        let Some(owner) = self.active.as_ref().map(|a| a.request.package_name.clone()) else {
            return;
        };

        tracing::debug!(package = %owner, "Display duration elapsed");

        let was_system = self.running.get(&owner) == Some(&AppKind::System);
        let view = self.take_active();
        if !(was_system && self.restore_override(now)) {
            self.go_idle(view);
        }
    }

    /// Bring back the display a system app covered, if its owner still runs
    fn restore_override(&mut self, now: Instant) -> bool {
        let Some(saved) = self.pre_override.take() else {
            return false;
        };

        if !self.running.contains_key(&saved.request.package_name) {
            tracing::debug!(
                package = %saved.request.package_name,
                "Saved display dropped, owner no longer running"
            );
            return false;
        }

        self.restore(saved, now);
        true
    }

    fn restore(&mut self, saved: SavedDisplay, now: Instant) {
        let expires_at = saved.remaining.map(|d| now + d);
        self.put_on_screen(saved.request, now, expires_at, ShowCause::Restore);
    }

    /// Show a request on behalf of an app, updating throttle and metrics
    fn show(&mut self, request: DisplayRequest, now: Instant, cause: ShowCause) {
        let package = request.package_name.clone();
        self.last_shown.insert(package.clone(), now);
        self.metrics
            .record_succeeded(&package, now.saturating_duration_since(request.submitted_at));

        let expires_at = request.duration.map(|d| now + d);
        self.put_on_screen(request, now, expires_at, cause);

        tracing::debug!(package = %package, cause = ?cause, "Display shown");
    }

    fn put_on_screen(
        &mut self,
        request: DisplayRequest,
        now: Instant,
        expires_at: Option<Instant>,
        cause: ShowCause,
    ) {
        self.timers.cancel(&TimerKind::AutoClear);
        if let Some(at) = expires_at {
            self.timers.schedule(TimerKind::AutoClear, at);
        }

        if self.running.get(&request.package_name) != Some(&AppKind::System)
            && cause != ShowCause::BootScreen
        {
            self.pre_override = None;
        }

        self.history.push(HistoryEntry {
            request: request.clone(),
            shown_at: now,
            cause,
        });
        self.outbox.push(DisplayUpdate::Show(request.clone()));
        self.active = Some(ActiveDisplay {
            request,
            started_at: now,
            expires_at,
        });

        if self.phase != DisplayPhase::Booting {
            self.phase = DisplayPhase::Active;
        }
    }

    fn take_active(&mut self) -> View {
        self.timers.cancel(&TimerKind::AutoClear);
        self.active
            .take()
            .map(|a| a.request.view)
            .unwrap_or(View::Main)
    }

    fn go_idle(&mut self, view: View) {
        self.timers.cancel(&TimerKind::AutoClear);
        self.active = None;
        self.phase = DisplayPhase::Idle;
        self.outbox.push(DisplayUpdate::Clear(view));
    }

    fn drop_throttle(&mut self, package: &PackageName) {
        self.throttle_slots.remove(package);
        self.timers.cancel(&TimerKind::Throttle(package.clone()));
    }

    fn active_is_system(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| self.running.get(&a.request.package_name) == Some(&AppKind::System))
    }

    fn boot_screen(&self, now: Instant) -> DisplayRequest {
        let names: Vec<&str> = self.loading.iter().map(PackageName::as_str).collect();
        DisplayRequest {
            package_name: self.config.system_package.clone(),
            view: View::Main,
            layout: Layout::ReferenceCard {
                title: "Starting App".into(),
                text: names.join(", "),
            },
            duration: None,
            force_display: false,
            submitted_at: now,
        }
    }
}
