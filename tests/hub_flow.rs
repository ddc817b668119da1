//! End-to-end flows through the `Hub` facade
//!
//! All tests run on tokio's paused clock; `hub.snapshot()` doubles as a
//! barrier since it round-trips through the session task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_test::{assert_err, assert_ok};

use tpa_hub::display::{DisplayPhase, Layout};
use tpa_hub::protocol::{DisplayEvent, StreamType, UserId};
use tpa_hub::registry::RegistryError;
use tpa_hub::{
    AccessPolicy, AppKind, AppOutbound, ConnectionHandle, Error, GlassesOutbound, Hub, HubConfig, HubHandler,
    PackageName, RecoveryNotification, RegistryConfig, SessionId, StaticPolicy, Subscription,
};

struct TestHandler {
    policy: StaticPolicy,
    deliveries: UnboundedSender<(String, RecoveryNotification)>,
    failures_left: AtomicU32,
}

impl AccessPolicy for TestHandler {
    fn validate_core_token(&self, core_token: &str) -> Option<UserId> {
        self.policy.validate_core_token(core_token)
    }

    fn validate_app_key(&self, package: &PackageName, api_key: &str) -> bool {
        self.policy.validate_app_key(package, api_key)
    }

    fn is_permitted(&self, package: &PackageName, subscription: &Subscription) -> bool {
        self.policy.is_permitted(package, subscription)
    }

    fn app_kind(&self, package: &PackageName) -> AppKind {
        self.policy.app_kind(package)
    }
}

impl HubHandler for TestHandler {
    async fn deliver_recovery(&self, webhook_url: &str, notification: &RecoveryNotification) -> Result<(), String> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err("503 Service Unavailable".into());
        }
        let _ = self.deliveries.send((webhook_url.to_owned(), notification.clone()));
        Ok(())
    }
}

const HOOK: &str = "https://notes.example/webhook";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn hub_with(config: HubConfig, failures: u32) -> (Hub<TestHandler>, UnboundedReceiver<(String, RecoveryNotification)>) {
    init_tracing();
    let policy = StaticPolicy::new()
        .user("tok-alice", "alice")
        .user("tok-bob", "bob")
        .app(
            "com.notes",
            "k-notes",
            AppKind::Standard,
            [Subscription::Stream(StreamType::ButtonPress)],
        )
        .app("com.music", "k-music", AppKind::Background, [Subscription::All])
        .app("com.radio", "k-radio", AppKind::Background, [Subscription::All])
        .app("com.os", "k-os", AppKind::System, [Subscription::All]);

    let (tx, rx) = mpsc::unbounded_channel();
    let handler = TestHandler {
        policy,
        deliveries: tx,
        failures_left: AtomicU32::new(failures),
    };
    (Hub::new(config, handler), rx)
}

fn hub() -> (Hub<TestHandler>, UnboundedReceiver<(String, RecoveryNotification)>) {
    hub_with(
        HubConfig::with_url("wss://hub.example/tpa-ws").recovery_retry_delay(Duration::from_millis(100)),
        0,
    )
}

async fn connect_glasses(hub: &Hub<TestHandler>, token: &str) -> (SessionId, UnboundedReceiver<GlassesOutbound>) {
    let (id, _conn, rx) = open_glasses(hub, token).await;
    (id, rx)
}

/// Connect glasses and keep the handle, whose id identifies its close
async fn open_glasses(
    hub: &Hub<TestHandler>,
    token: &str,
) -> (SessionId, ConnectionHandle<GlassesOutbound>, UnboundedReceiver<GlassesOutbound>) {
    let (conn, rx) = ConnectionHandle::channel();
    let init = json!({"type": "connection_init", "coreToken": token}).to_string();
    let id = hub.connect_glasses(&init, conn.clone()).await.unwrap();
    (id, conn, rx)
}

async fn connect_app(hub: &Hub<TestHandler>, session: SessionId, package: &str, key: &str) -> UnboundedReceiver<AppOutbound> {
    open_app(hub, session, package, key).await.1
}

async fn open_app(
    hub: &Hub<TestHandler>,
    session: SessionId,
    package: &str,
    key: &str,
) -> (ConnectionHandle<AppOutbound>, UnboundedReceiver<AppOutbound>) {
    let (conn, rx) = ConnectionHandle::channel();
    let init = json!({
        "type": "tpa_connection_init",
        "packageName": package,
        "sessionId": session.to_string(),
        "apiKey": key
    })
    .to_string();
    hub.connect_app(&init, conn.clone()).await.unwrap();
    (conn, rx)
}

async fn glasses(hub: &Hub<TestHandler>, session: SessionId, msg: serde_json::Value) {
    hub.handle_glasses_message(session, &msg.to_string()).await.unwrap();
}

async fn app(hub: &Hub<TestHandler>, session: SessionId, package: &str, msg: serde_json::Value) {
    hub.handle_app_message(session, &package.into(), &msg.to_string())
        .await
        .unwrap();
}

fn text(package: &str, text: &str) -> serde_json::Value {
    json!({
        "type": "display_request",
        "packageName": package,
        "view": "main",
        "layout": {"layoutType": "text_wall", "text": text}
    })
}

fn drain<M>(rx: &mut UnboundedReceiver<M>) -> Vec<M> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn display_events(msgs: Vec<GlassesOutbound>) -> Vec<DisplayEvent> {
    msgs.into_iter()
        .filter_map(|m| match m {
            GlassesOutbound::DisplayEvent(event) => Some(event),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_start_subscribe_route_and_display() {
    let (hub, _deliveries) = hub();
    let (session, mut glasses_rx) = connect_glasses(&hub, "tok-alice").await;
    let mut notes = connect_app(&hub, session, "com.notes", "k-notes").await;

    glasses(&hub, session, json!({"type": "start_app", "packageName": "com.notes"})).await;
    app(
        &hub,
        session,
        "com.notes",
        json!({"type": "subscription_update", "packageName": "com.notes", "subscriptions": ["button_press"]}),
    )
    .await;
    app(&hub, session, "com.notes", text("com.notes", "Hello")).await;
    glasses(&hub, session, json!({"type": "button_press", "buttonId": "main", "pressType": "short"})).await;

    let snap = hub.snapshot(session).await.unwrap();
    assert_eq!(snap.phase, DisplayPhase::Booting);
    assert_eq!(snap.loading_apps, vec![PackageName::from("com.notes")]);

    let to_notes = drain(&mut notes);
    assert!(matches!(to_notes[0], AppOutbound::ConnectionAck { session_id } if session_id == session));
    let AppOutbound::DataStream { stream_type, data, .. } = &to_notes[1] else {
        panic!("expected routed event, got {:?}", to_notes[1]);
    };
    assert_eq!(*stream_type, StreamType::ButtonPress);
    let payload: serde_json::Value = serde_json::from_slice(data).unwrap();
    assert_eq!(payload["buttonId"], "main");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let snap = hub.snapshot(session).await.unwrap();
    assert_eq!(snap.active_text(), Some("Hello"));

    let events = display_events(drain(&mut glasses_rx));
    let last = events.last().unwrap();
    assert_eq!(last.package_name.as_str(), "com.notes");
    assert_eq!(last.layout, Layout::TextWall { text: "Hello".into() });
}

#[tokio::test(start_paused = true)]
async fn test_sessions_are_isolated() {
    let (hub, _deliveries) = hub();
    let (alice, mut alice_glasses) = connect_glasses(&hub, "tok-alice").await;
    let (bob, mut bob_glasses) = connect_glasses(&hub, "tok-bob").await;
    assert_ne!(alice, bob);

    let mut alice_music = connect_app(&hub, alice, "com.music", "k-music").await;
    let mut bob_music = connect_app(&hub, bob, "com.music", "k-music").await;

    for session in [alice, bob] {
        glasses(&hub, session, json!({"type": "start_app", "packageName": "com.music"})).await;
        app(
            &hub,
            session,
            "com.music",
            json!({"type": "subscription_update", "packageName": "com.music", "subscriptions": ["*"]}),
        )
        .await;
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;
    hub.snapshot(alice).await.unwrap();
    hub.snapshot(bob).await.unwrap();
    drain(&mut alice_glasses);
    drain(&mut bob_glasses);
    drain(&mut alice_music);
    drain(&mut bob_music);

    app(&hub, alice, "com.music", text("com.music", "alice only")).await;
    glasses(&hub, alice, json!({"type": "location_update", "lat": 1.0, "lng": 2.0})).await;

    let alice_snap = hub.snapshot(alice).await.unwrap();
    let bob_snap = hub.snapshot(bob).await.unwrap();

    assert_eq!(alice_snap.active_text(), Some("alice only"));
    assert!(bob_snap.active.is_none());
    assert_eq!(bob_snap.lock_holder, None);
    assert_eq!(display_events(drain(&mut alice_glasses)).len(), 1);
    assert!(drain(&mut bob_glasses).is_empty());
    assert_eq!(drain(&mut alice_music).len(), 1);
    assert!(drain(&mut bob_music).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_background_lock_and_release() {
    let (hub, _deliveries) = hub();
    let (session, _glasses_rx) = connect_glasses(&hub, "tok-alice").await;
    let _music = connect_app(&hub, session, "com.music", "k-music").await;
    let _radio = connect_app(&hub, session, "com.radio", "k-radio").await;

    glasses(&hub, session, json!({"type": "start_app", "packageName": "com.music"})).await;
    glasses(&hub, session, json!({"type": "start_app", "packageName": "com.radio"})).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    app(&hub, session, "com.music", text("com.music", "now playing")).await;
    app(&hub, session, "com.radio", text("com.radio", "station 1")).await;

    let snap = hub.snapshot(session).await.unwrap();
    assert_eq!(snap.active_text(), Some("now playing"));
    assert_eq!(snap.lock_holder, Some(PackageName::from("com.music")));
    assert_eq!(snap.metrics.for_app("com.radio").blocked, 1);

    assert_ok!(hub.release_lock(session, "com.music".into()).await);
    app(&hub, session, "com.radio", text("com.radio", "station 2")).await;

    let snap = hub.snapshot(session).await.unwrap();
    assert_eq!(snap.active_text(), Some("station 2"));
    assert_eq!(snap.lock_holder, Some(PackageName::from("com.radio")));
}

#[tokio::test(start_paused = true)]
async fn test_stop_app_notifies_and_clears_display() {
    let (hub, _deliveries) = hub();
    let (session, mut glasses_rx) = connect_glasses(&hub, "tok-alice").await;
    let mut notes = connect_app(&hub, session, "com.notes", "k-notes").await;

    glasses(&hub, session, json!({"type": "start_app", "packageName": "com.notes"})).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    app(&hub, session, "com.notes", text("com.notes", "note")).await;
    hub.snapshot(session).await.unwrap();
    drain(&mut glasses_rx);

    glasses(&hub, session, json!({"type": "stop_app", "packageName": "com.notes"})).await;
    let snap = hub.snapshot(session).await.unwrap();

    assert!(snap.active.is_none());
    assert!(!snap.is_running("com.notes"));
    assert!(drain(&mut notes).contains(&AppOutbound::AppStopped { reason: "stopped".into() }));

    let msgs = drain(&mut glasses_rx);
    assert!(msgs.iter().any(|m| matches!(
        m,
        GlassesOutbound::AppStateChange { active_app_package_names, .. } if active_app_package_names.is_empty()
    )));
    let events = display_events(msgs);
    assert_eq!(events.last().unwrap().layout, Layout::blank());
}

#[tokio::test(start_paused = true)]
async fn test_app_message_with_wrong_package_rejected() {
    let (hub, _deliveries) = hub();
    let (session, _glasses_rx) = connect_glasses(&hub, "tok-alice").await;
    let _notes = connect_app(&hub, session, "com.notes", "k-notes").await;

    let err = hub
        .handle_app_message(session, &"com.notes".into(), &text("com.music", "spoof").to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[tokio::test(start_paused = true)]
async fn test_app_with_bad_key_rejected() {
    let (hub, _deliveries) = hub();
    let (session, _glasses_rx) = connect_glasses(&hub, "tok-alice").await;

    let (conn, mut rx) = ConnectionHandle::channel();
    let init = json!({
        "type": "tpa_connection_init",
        "packageName": "com.notes",
        "sessionId": session.to_string(),
        "apiKey": "wrong"
    });
    let err = hub.connect_app(&init.to_string(), conn).await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
    assert!(matches!(rx.try_recv(), Ok(AppOutbound::ConnectionError { .. })));
    assert!(hub.snapshot(session).await.unwrap().connected_apps.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_glasses_reconnect_within_grace_period_keeps_session() {
    let (hub, _deliveries) = hub();
    let (session, old_conn, _old_rx) = open_glasses(&hub, "tok-alice").await;
    glasses(&hub, session, json!({"type": "start_app", "packageName": "com.notes"})).await;

    assert!(assert_ok!(hub.disconnect_glasses(session, old_conn.id()).await));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(hub.cleanup_sessions().await.is_empty());

    let (again, mut rx) = connect_glasses(&hub, "tok-alice").await;
    assert_eq!(again, session);

    hub.snapshot(session).await.unwrap();
    let msgs = drain(&mut rx);
    assert_eq!(
        msgs[0],
        GlassesOutbound::ConnectionAck {
            session_id: session,
            active_app_package_names: vec!["com.notes".into()],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_close_of_replaced_glasses_keeps_session() {
    let (hub, _deliveries) = hub();
    let (session, first, _first_rx) = open_glasses(&hub, "tok-alice").await;
    glasses(&hub, session, json!({"type": "start_app", "packageName": "com.notes"})).await;

    // glasses reconnect on a new socket before the old one reports its close
    let (again, second, mut second_rx) = open_glasses(&hub, "tok-alice").await;
    assert_eq!(again, session);

    assert!(!assert_ok!(hub.disconnect_glasses(session, first.id()).await));

    let snap = hub.snapshot(session).await.unwrap();
    assert!(!first.is_open());
    assert!(snap.glasses_connected);
    assert!(snap.disconnected_at.is_none());
    assert!(second.is_open());
    assert!(!drain(&mut second_rx).is_empty());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(hub.cleanup_sessions().await.is_empty());
    assert!(hub.snapshot(session).await.unwrap().is_running("com.notes"));
}

#[tokio::test(start_paused = true)]
async fn test_late_close_of_replaced_app_keeps_connection() {
    let (hub, _deliveries) = hub();
    let (session, mut glasses_rx) = connect_glasses(&hub, "tok-alice").await;
    let (first, _first_rx) = open_app(&hub, session, "com.notes", "k-notes").await;
    let (second, mut second_rx) = open_app(&hub, session, "com.notes", "k-notes").await;

    glasses(&hub, session, json!({"type": "start_app", "packageName": "com.notes"})).await;
    app(
        &hub,
        session,
        "com.notes",
        json!({"type": "subscription_update", "packageName": "com.notes", "subscriptions": ["button_press"]}),
    )
    .await;

    assert_ok!(hub.disconnect_app(session, "com.notes".into(), first.id()).await);
    let snap = hub.snapshot(session).await.unwrap();
    assert_eq!(snap.connected_apps, vec![PackageName::from("com.notes")]);
    assert!(second.is_open());

    drain(&mut second_rx);
    glasses(&hub, session, json!({"type": "button_press", "buttonId": "main"})).await;
    hub.snapshot(session).await.unwrap();
    assert!(matches!(
        drain(&mut second_rx).as_slice(),
        [AppOutbound::DataStream { stream_type: StreamType::ButtonPress, .. }]
    ));

    // the live connection's close detaches it
    assert_ok!(hub.disconnect_app(session, "com.notes".into(), second.id()).await);
    let snap = hub.snapshot(session).await.unwrap();
    assert!(snap.connected_apps.is_empty());
    assert!(snap.is_running("com.notes"));
    drain(&mut glasses_rx);
}

#[tokio::test(start_paused = true)]
async fn test_session_ends_after_grace_period_without_dangling_timers() {
    let config = HubConfig::default().session_grace_period(Duration::from_millis(500));
    let (hub, _deliveries) = hub_with(config, 0);
    let (session, glasses_conn, mut glasses_rx) = open_glasses(&hub, "tok-alice").await;
    let mut notes = connect_app(&hub, session, "com.notes", "k-notes").await;

    glasses(&hub, session, json!({"type": "start_app", "packageName": "com.notes"})).await;
    app(&hub, session, "com.notes", text("com.notes", "queued during boot")).await;
    assert_ok!(hub.disconnect_glasses(session, glasses_conn.id()).await);
    assert_eq!(hub.snapshot(session).await.unwrap().phase, DisplayPhase::Booting);

    // grace period runs out while the boot screen is still up
    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(hub.cleanup_sessions().await, vec![session]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_err!(hub.snapshot(session).await);
    assert!(drain(&mut notes).contains(&AppOutbound::AppStopped {
        reason: "session_ended".into()
    }));
    assert!(display_events(drain(&mut glasses_rx))
        .iter()
        .all(|e| e.layout.text() != Some("queued during boot")));
}

#[tokio::test(start_paused = true)]
async fn test_notify_restart_delivers_recovery() {
    let (hub, mut deliveries) = hub();
    let (session, _glasses_rx) = connect_glasses(&hub, "tok-alice").await;

    let reg = hub
        .register_server("com.notes", "secret", HOOK, vec!["https://notes-1.example".into()])
        .await
        .unwrap();
    let _notes = connect_app(&hub, session, "com.notes", "k-notes").await;

    assert_eq!(hub.notify_restart(reg, "secret").await.unwrap(), 1);

    let (url, notification) = deliveries.recv().await.unwrap();
    assert_eq!(url, HOOK);
    assert_eq!(notification.session_id, session);
    assert_eq!(notification.user_id, "alice");
    assert_eq!(notification.package_name.as_str(), "com.notes");
    assert_eq!(notification.connection_url, "wss://hub.example/tpa-ws");
}

#[tokio::test(start_paused = true)]
async fn test_recovery_retries_until_delivered() {
    let config = HubConfig::default()
        .recovery_max_attempts(3)
        .recovery_retry_delay(Duration::from_millis(100));
    let (hub, mut deliveries) = hub_with(config, 2);
    let (session, _glasses_rx) = connect_glasses(&hub, "tok-alice").await;

    let reg = hub.register_server("com.notes", "secret", HOOK, vec![]).await.unwrap();
    let _notes = connect_app(&hub, session, "com.notes", "k-notes").await;

    let start = tokio::time::Instant::now();
    hub.notify_restart(reg, "secret").await.unwrap();
    let (_, notification) = deliveries.recv().await.unwrap();

    assert_eq!(notification.session_id, session);
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_restarted_server_reregisters_and_recovers() {
    let (hub, mut deliveries) = hub();
    let (session, _glasses_rx) = connect_glasses(&hub, "tok-alice").await;

    let old = hub.register_server("com.notes", "secret", HOOK, vec![]).await.unwrap();
    let _notes = connect_app(&hub, session, "com.notes", "k-notes").await;

    let fresh = hub.register_server("com.notes", "secret-2", HOOK, vec![]).await.unwrap();
    assert!(matches!(
        hub.notify_restart(old, "secret").await,
        Err(Error::Registry(RegistryError::NotFound(_)))
    ));
    assert_eq!(hub.notify_restart(fresh, "secret-2").await.unwrap(), 1);
    assert_eq!(deliveries.recv().await.unwrap().1.session_id, session);
}

#[tokio::test(start_paused = true)]
async fn test_expired_registration_skips_recovery() {
    let config = HubConfig::default().registry(
        RegistryConfig::default()
            .heartbeat_interval(Duration::from_secs(10))
            .missed_heartbeats(3),
    );
    let (hub, mut deliveries) = hub_with(config, 0);
    let (session, _glasses_rx) = connect_glasses(&hub, "tok-alice").await;

    let reg = hub.register_server("com.notes", "secret", HOOK, vec![]).await.unwrap();
    let _notes = connect_app(&hub, session, "com.notes", "k-notes").await;

    tokio::time::advance(Duration::from_secs(25)).await;
    assert_ok!(hub.heartbeat(reg).await);
    tokio::time::advance(Duration::from_secs(31)).await;
    hub.servers().cleanup().await;

    assert!(matches!(
        hub.heartbeat(reg).await,
        Err(Error::Registry(RegistryError::Expired(_)))
    ));
    assert!(matches!(
        hub.notify_restart(reg, "secret").await,
        Err(Error::Registry(RegistryError::Expired(_)))
    ));
    assert!(deliveries.try_recv().is_err());

    // the session itself is unaffected
    assert!(hub.snapshot(session).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_run_until_ends_sessions_on_shutdown() {
    let (hub, _deliveries) = hub();
    let (session, _glasses_rx) = connect_glasses(&hub, "tok-alice").await;

    hub.run_until(tokio::time::sleep(Duration::from_secs(1))).await;

    assert_eq!(hub.sessions().session_count().await, 0);
    assert_err!(hub.snapshot(session).await);
}
