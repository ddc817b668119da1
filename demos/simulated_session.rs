//! Scripted smart-glasses session driven through an in-process hub
//!
//! Run with: cargo run --example simulated_session
//!
//! Plays one user's glasses and three apps against a `Hub`, printing every
//! frame the hub would put on the wire:
//!
//! - a captions app (background) subscribes to transcription and shows text
//! - a notes app (standard) starts, takes the boot screen, and is replaced
//! - a system notification overrides the display and hands it back
//! - the captions server "restarts" and gets a recovery webhook
//!
//! Set `RUST_LOG=tpa_hub=trace` for scheduler decisions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tpa_hub::protocol::UserId;
use tpa_hub::{
    AccessPolicy, AppKind, AppOutbound, ConnectionHandle, GlassesOutbound, Hub, HubConfig, HubHandler,
    PackageName, RecoveryNotification, SessionId, StaticPolicy, StreamType, Subscription,
};

/// Demo handler: a static policy plus a webhook that just prints
struct DemoHandler {
    policy: StaticPolicy,
    webhooks: AtomicU32,
}

impl AccessPolicy for DemoHandler {
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

impl HubHandler for DemoHandler {
    async fn deliver_recovery(&self, webhook_url: &str, notification: &RecoveryNotification) -> Result<(), String> {
        // first attempt fails to show the retry path
        if self.webhooks.fetch_add(1, Ordering::Relaxed) == 0 {
            return Err("connection refused".into());
        }
        let body = serde_json::to_string(notification).map_err(|e| e.to_string())?;
        println!("POST {} {}", webhook_url, body);
        Ok(())
    }
}

fn print_glasses(mut rx: UnboundedReceiver<GlassesOutbound>) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            println!("glasses <- {}", String::from_utf8_lossy(&msg.encode()));
        }
    });
}

fn print_app(name: &'static str, mut rx: UnboundedReceiver<AppOutbound>) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            println!("{:>8} <- {}", name, String::from_utf8_lossy(&msg.encode()));
        }
    });
}

async fn connect_app(
    hub: &Hub<DemoHandler>,
    session_id: SessionId,
    name: &'static str,
    package: &str,
    api_key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (conn, rx) = ConnectionHandle::channel();
    print_app(name, rx);
    let init = json!({
        "type": "tpa_connection_init",
        "packageName": package,
        "sessionId": session_id.to_string(),
        "apiKey": api_key,
    });
    hub.connect_app(&init.to_string(), conn).await?;
    Ok(())
}

fn show(package: &str, text: &str, duration_ms: Option<u64>) -> String {
    let mut msg = json!({
        "type": "display_request",
        "packageName": package,
        "view": "main",
        "layout": {"layoutType": "text_wall", "text": text},
    });
    if let Some(ms) = duration_ms {
        msg["durationMs"] = json!(ms);
    }
    msg.to_string()
}

async fn pause(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tpa_hub=info".parse()?)
                .add_directive("simulated_session=debug".parse()?),
        )
        .init();

    let policy = StaticPolicy::new()
        .user("core-token-demo", "demo@example.com")
        .app(
            "com.example.captions",
            "captions-key",
            AppKind::Background,
            [Subscription::Stream(StreamType::Transcription)],
        )
        .app(
            "com.example.notes",
            "notes-key",
            AppKind::Standard,
            [Subscription::Stream(StreamType::ButtonPress)],
        )
        .app("com.example.translate", "translate-key", AppKind::Standard, [])
        .app("com.example.system", "system-key", AppKind::System, [Subscription::All]);

    let config = HubConfig::with_url("wss://hub.example.com/tpa-ws")
        .recovery_retry_delay(Duration::from_millis(200));
    let hub = Hub::new(
        config,
        DemoHandler {
            policy,
            webhooks: AtomicU32::new(0),
        },
    );

    let registration = hub
        .register_server(
            "com.example.captions",
            "captions-secret",
            "https://captions.example.com/webhook",
            vec!["https://captions.example.com".into()],
        )
        .await?;

    let (glasses, glasses_rx) = ConnectionHandle::channel();
    print_glasses(glasses_rx);
    let session_id = hub
        .connect_glasses(r#"{"type":"connection_init","coreToken":"core-token-demo"}"#, glasses)
        .await?;
    println!("session {}", session_id);

    connect_app(&hub, session_id, "captions", "com.example.captions", "captions-key").await?;
    connect_app(&hub, session_id, "notes", "com.example.notes", "notes-key").await?;
    connect_app(&hub, session_id, "system", "com.example.system", "system-key").await?;

    println!("\n=== start captions, subscribe, speak ===");
    hub.handle_glasses_message(session_id, r#"{"type":"start_app","packageName":"com.example.captions"}"#)
        .await?;
    hub.handle_glasses_message(session_id, r#"{"type":"start_app","packageName":"com.example.system"}"#)
        .await?;
    let captions: PackageName = "com.example.captions".into();
    hub.handle_app_message(
        session_id,
        &captions,
        &json!({
            "type": "subscription_update",
            "packageName": "com.example.captions",
            "subscriptions": ["transcription", "head_position"],
        })
        .to_string(),
    )
    .await?;
    pause(1600).await;

    hub.handle_glasses_message(
        session_id,
        r#"{"type":"transcription","text":"good morning","isFinal":true}"#,
    )
    .await?;
    hub.handle_app_message(session_id, &captions, &show("com.example.captions", "good morning", None))
        .await?;
    // the second request is throttled and then superseded by the third
    hub.handle_app_message(session_id, &captions, &show("com.example.captions", "good morning, ev", None))
        .await?;
    hub.handle_app_message(session_id, &captions, &show("com.example.captions", "good morning, everyone", None))
        .await?;
    pause(400).await;

    println!("\n=== notification override ===");
    let system: PackageName = "com.example.system".into();
    hub.handle_app_message(session_id, &system, &show("com.example.system", "Battery 15%", Some(1000)))
        .await?;
    pause(1200).await;

    println!("\n=== standard app replacement ===");
    hub.handle_glasses_message(session_id, r#"{"type":"start_app","packageName":"com.example.notes"}"#)
        .await?;
    pause(1600).await;
    hub.handle_glasses_message(session_id, r#"{"type":"start_app","packageName":"com.example.translate"}"#)
        .await?;
    pause(1600).await;

    println!("\n=== app server restart ===");
    let dispatched = hub.notify_restart(registration, "captions-secret").await?;
    println!("recovery dispatched for {} session(s)", dispatched);
    pause(500).await;

    let snapshot = hub.snapshot(session_id).await?;
    println!("\n=== final state ===");
    println!("phase:       {:?}", snapshot.phase);
    println!("running:     {:?}", snapshot.active_apps);
    println!("on screen:   {:?}", snapshot.active_text());
    println!("lock holder: {:?}", snapshot.lock_holder);
    println!(
        "events:      {} routed, {} delivered",
        snapshot.stats.events_routed, snapshot.stats.events_delivered
    );
    let mut per_app: Vec<_> = snapshot.metrics.per_app.iter().collect();
    per_app.sort_by(|a, b| a.0.cmp(b.0));
    for (package, counts) in per_app {
        println!(
            "  {:<24} requests={} succeeded={} throttled={} blocked={}",
            package.as_str(),
            counts.requests,
            counts.succeeded,
            counts.throttled,
            counts.blocked
        );
    }

    hub.run_until(pause(100)).await;
    println!("\nShutting down...");
    Ok(())
}
