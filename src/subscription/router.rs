//! Subscription router implementation
//!
//! Keeps a forward map (app → subscriptions) and a reverse map
//! (stream type → apps) in lockstep. Updates are applied as a diff against the
//! app's previous set; the reverse map is never rebuilt wholesale.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;

use crate::connection::{ConnectionError, ConnectionRegistry};
use crate::protocol::{AppOutbound, PackageName, StreamEvent, StreamType, Subscription};

/// Why a requested stream type was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Not a stream type the hub knows
    UnknownStream,
    /// The app has not declared permission for this stream
    PermissionDenied,
}

/// One rejected entry of a subscription update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRejection {
    pub stream: String,
    pub reason: RejectReason,
}

/// Result of [`SubscriptionRouter::update`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Subscriptions newly linked
    pub added: usize,
    /// Subscriptions unlinked because they were absent from the new set
    pub removed: usize,
    /// Entries that were not applied, with the reason
    pub rejected: Vec<SubscriptionRejection>,
}

/// Result of [`SubscriptionRouter::broadcast`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub delivered: usize,
    /// Sends to a connection that has closed
    pub failed: usize,
    /// Subscribers with no connection attached, e.g. while reconnecting
    pub detached: usize,
}

/// Per-session subscription tables
#[derive(Debug, Default)]
pub struct SubscriptionRouter {
    by_app: HashMap<PackageName, HashSet<Subscription>>,
    by_stream: HashMap<StreamType, HashSet<PackageName>>,
    wildcard: HashSet<PackageName>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an app's subscription set
    ///
    /// Each requested entry is checked on its own: unknown or unpermitted
    /// entries are reported back, the rest are applied.
    pub fn update<S, F>(&mut self, package: &PackageName, requested: &[S], permitted: F) -> UpdateReport
    where
        S: AsRef<str>,
        F: Fn(&Subscription) -> bool,
    {
        let mut report = UpdateReport::default();
        let mut next = HashSet::new();

        for raw in requested {
            let raw = raw.as_ref();
            match Subscription::from_str(raw) {
                Ok(sub) if permitted(&sub) => {
                    next.insert(sub);
                }
                Ok(_) => report.rejected.push(SubscriptionRejection {
                    stream: raw.to_owned(),
                    reason: RejectReason::PermissionDenied,
                }),
                Err(_) => report.rejected.push(SubscriptionRejection {
                    stream: raw.to_owned(),
                    reason: RejectReason::UnknownStream,
                }),
            }
        }

        let prev = self.by_app.remove(package).unwrap_or_default();

        for sub in prev.difference(&next) {
            self.unlink(package, sub);
            report.removed += 1;
        }
        for sub in next.difference(&prev) {
            self.link(package, sub);
            report.added += 1;
        }

        if !next.is_empty() {
            self.by_app.insert(package.clone(), next);
        }

        tracing::debug!(
            package = %package,
            added = report.added,
            removed = report.removed,
            rejected = report.rejected.len(),
            "Subscriptions updated"
        );

        report
    }

    /// Apps that should receive events of this stream type
    pub fn resolve(&self, stream: StreamType) -> HashSet<PackageName> {
        let mut apps = self.by_stream.get(&stream).cloned().unwrap_or_default();
        apps.extend(self.wildcard.iter().cloned());
        apps
    }

    /// Current subscriptions of an app
    pub fn subscriptions(&self, package: &str) -> Option<&HashSet<Subscription>> {
        self.by_app.get(package)
    }

    /// Check whether an app would receive a stream type
    pub fn is_subscribed(&self, package: &str, stream: StreamType) -> bool {
        self.wildcard.contains(package)
            || self
                .by_stream
                .get(&stream)
                .is_some_and(|apps| apps.contains(package))
    }

    /// Drop every subscription of an app; returns whether it had any
    pub fn remove(&mut self, package: &PackageName) -> bool {
        let Some(subs) = self.by_app.remove(package) else {
            return false;
        };

        for sub in &subs {
            self.unlink(package, sub);
        }
        true
    }

    /// Send an event to every subscriber
    ///
    /// The payload is encoded once and shared. A failed send is logged and
    /// counted; it never prevents delivery to the other recipients. Apps that
    /// are detached keep their subscriptions and are skipped quietly.
    pub fn broadcast(&self, event: &StreamEvent, connections: &ConnectionRegistry) -> BroadcastReport {
        let recipients = self.resolve(event.stream);
        let mut report = BroadcastReport {
            recipients: recipients.len(),
            ..Default::default()
        };

        if recipients.is_empty() {
            return report;
        }

        let data = match serde_json::to_vec(&event.payload) {
            Ok(buf) => Bytes::from(buf),
            Err(e) => {
                tracing::error!(stream = %event.stream, error = %e, "Failed to encode event");
                report.failed = recipients.len();
                return report;
            }
        };

        for package in &recipients {
            let msg = AppOutbound::DataStream {
                stream_type: event.stream,
                data: data.clone(),
                timestamp: event.timestamp,
            };

            match connections.send_to_app(package.as_str(), msg) {
                Ok(()) => report.delivered += 1,
                Err(e @ ConnectionError::NotConnected(_)) => {
                    report.detached += 1;
                    tracing::debug!(
                        package = %package,
                        stream = %event.stream,
                        error = %e,
                        "Event skipped, app detached"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        package = %package,
                        stream = %event.stream,
                        error = %e,
                        "Event delivery failed"
                    );
                }
            }
        }

        tracing::trace!(
            stream = %event.stream,
            delivered = report.delivered,
            failed = report.failed,
            detached = report.detached,
            "Event broadcast"
        );

        report
    }

    /// Number of apps with at least one subscription
    pub fn app_count(&self) -> usize {
        self.by_app.len()
    }

    /// Drop all tables
    pub fn clear(&mut self) {
        self.by_app.clear();
        self.by_stream.clear();
        self.wildcard.clear();
    }

    fn link(&mut self, package: &PackageName, sub: &Subscription) {
        match sub {
            Subscription::All => {
                self.wildcard.insert(package.clone());
            }
            Subscription::Stream(stream) => {
                self.by_stream
                    .entry(*stream)
                    .or_default()
                    .insert(package.clone());
            }
        }
    }

    fn unlink(&mut self, package: &PackageName, sub: &Subscription) {
        match sub {
            Subscription::All => {
                self.wildcard.remove(package);
            }
            Subscription::Stream(stream) => {
                if let Some(apps) = self.by_stream.get_mut(stream) {
                    apps.remove(package);
                    if apps.is_empty() {
                        self.by_stream.remove(stream);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::connection::ConnectionHandle;

    fn allow_all(_: &Subscription) -> bool {
        true
    }

    fn event(stream: StreamType) -> StreamEvent {
        let mut payload = Map::new();
        payload.insert("level".into(), 80.into());
        StreamEvent {
            stream,
            payload,
            timestamp: 1,
        }
    }

    #[test]
    fn test_update_and_resolve() {
        let mut router = SubscriptionRouter::new();
        let app: PackageName = "com.a".into();

        let report = router.update(&app, &["button_press", "head_position"], allow_all);
        assert_eq!(report.added, 2);
        assert!(report.rejected.is_empty());

        assert!(router.resolve(StreamType::ButtonPress).contains(&app));
        assert!(router.resolve(StreamType::Vad).is_empty());
    }

    #[test]
    fn test_update_applies_diff() {
        let mut router = SubscriptionRouter::new();
        let app: PackageName = "com.a".into();

        router.update(&app, &["button_press", "head_position"], allow_all);
        let report = router.update(&app, &["head_position", "vad"], allow_all);

        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
        assert!(!router.resolve(StreamType::ButtonPress).contains(&app));
        assert!(router.resolve(StreamType::Vad).contains(&app));
        assert!(router.is_subscribed("com.a", StreamType::HeadPosition));
    }

    #[test]
    fn test_rejections_are_per_entry() {
        let mut router = SubscriptionRouter::new();
        let app: PackageName = "com.a".into();

        let report = router.update(
            &app,
            &["button_press", "mind_reading", "location_update"],
            |sub: &Subscription| *sub != Subscription::Stream(StreamType::LocationUpdate),
        );

        assert_eq!(report.added, 1);
        assert_eq!(
            report.rejected,
            vec![
                SubscriptionRejection {
                    stream: "mind_reading".into(),
                    reason: RejectReason::UnknownStream,
                },
                SubscriptionRejection {
                    stream: "location_update".into(),
                    reason: RejectReason::PermissionDenied,
                },
            ]
        );
        assert!(router.is_subscribed("com.a", StreamType::ButtonPress));
        assert!(!router.is_subscribed("com.a", StreamType::LocationUpdate));
    }

    #[test]
    fn test_wildcard_always_resolves() {
        let mut router = SubscriptionRouter::new();
        let all: PackageName = "com.all".into();
        let one: PackageName = "com.one".into();

        router.update(&all, &["*"], allow_all);
        router.update(&one, &["vad"], allow_all);

        let vad = router.resolve(StreamType::Vad);
        assert_eq!(vad.len(), 2);
        let battery = router.resolve(StreamType::PhoneBatteryUpdate);
        assert_eq!(battery.len(), 1);
        assert!(battery.contains(&all));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut router = SubscriptionRouter::new();
        let app: PackageName = "com.a".into();
        router.update(&app, &["button_press", "*"], allow_all);

        assert!(router.remove(&app));
        assert!(!router.remove(&app));
        assert!(!router.resolve(StreamType::ButtonPress).contains(&app));
        assert!(!router.resolve(StreamType::Vad).contains(&app));
        assert_eq!(router.app_count(), 0);
    }

    #[test]
    fn test_empty_update_unsubscribes() {
        let mut router = SubscriptionRouter::new();
        let app: PackageName = "com.a".into();
        router.update(&app, &["button_press"], allow_all);

        let empty: [&str; 0] = [];
        let report = router.update(&app, &empty, allow_all);
        assert_eq!(report.removed, 1);
        assert!(router.subscriptions("com.a").is_none());
    }

    #[test]
    fn test_broadcast_isolates_failed_recipient() {
        let mut router = SubscriptionRouter::new();
        let mut connections = ConnectionRegistry::new();

        let (good, mut good_rx) = ConnectionHandle::channel();
        let (bad, bad_rx) = ConnectionHandle::channel();
        drop(bad_rx);
        connections.attach_app("com.good".into(), good);
        connections.attach_app("com.bad".into(), bad);

        router.update(&"com.good".into(), &["glasses_battery_update"], allow_all);
        router.update(&"com.bad".into(), &["glasses_battery_update"], allow_all);
        router.update(&"com.absent".into(), &["glasses_battery_update"], allow_all);

        let report = router.broadcast(&event(StreamType::GlassesBatteryUpdate), &connections);
        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.detached, 1);

        match good_rx.try_recv().unwrap() {
            AppOutbound::DataStream {
                stream_type, data, ..
            } => {
                assert_eq!(stream_type, StreamType::GlassesBatteryUpdate);
                let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
                assert_eq!(value["level"], 80);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_skips_detached_app_until_reattached() {
        let mut router = SubscriptionRouter::new();
        let mut connections = ConnectionRegistry::new();
        router.update(&"com.a".into(), &["vad"], allow_all);

        let (first, _first_rx) = ConnectionHandle::channel();
        connections.attach_app("com.a".into(), first.clone());
        connections.detach_app_if("com.a", first.id());

        let report = router.broadcast(&event(StreamType::Vad), &connections);
        assert_eq!(
            report,
            BroadcastReport {
                recipients: 1,
                detached: 1,
                ..Default::default()
            }
        );

        let (second, mut rx) = ConnectionHandle::channel();
        connections.attach_app("com.a".into(), second);
        let report = router.broadcast(&event(StreamType::Vad), &connections);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.detached, 0);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let router = SubscriptionRouter::new();
        let connections = ConnectionRegistry::new();
        let report = router.broadcast(&event(StreamType::Vad), &connections);
        assert_eq!(report, BroadcastReport::default());
    }
}
