//! Hub handler traits
//!
//! The hub does not authenticate users, store permissions, or speak HTTP.
//! Those are supplied by the embedding application through these traits.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use serde::Serialize;

use crate::display::AppKind;
use crate::protocol::{PackageName, SessionId, Subscription, UserId};

/// Synchronous checks consulted while handling messages
///
/// Sessions hold this as `Arc<dyn AccessPolicy>`, so every method must be
/// cheap and must not block.
pub trait AccessPolicy: Send + Sync + 'static {
    /// Resolve a glasses core token to the user it belongs to
    fn validate_core_token(&self, core_token: &str) -> Option<UserId>;

    /// Check an app's API key on `connection_init`
    fn validate_app_key(&self, package: &PackageName, api_key: &str) -> bool;

    /// Whether the app has declared permission for a subscription
    fn is_permitted(&self, package: &PackageName, subscription: &Subscription) -> bool {
        let _ = (package, subscription);
        true
    }

    /// Scheduling class of an app
    fn app_kind(&self, package: &PackageName) -> AppKind {
        let _ = package;
        AppKind::Standard
    }
}

/// Recovery notification sent to an app server after it restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryNotification {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub package_name: PackageName,
    /// Where the app should reconnect
    pub connection_url: String,
}

/// Handler for the hub's outbound side effects
///
/// # Example
///
/// ```ignore
/// struct MyHandler;
///
/// impl AccessPolicy for MyHandler {
///     fn validate_core_token(&self, token: &str) -> Option<UserId> {
///         lookup_user(token)
///     }
///
///     fn validate_app_key(&self, package: &PackageName, key: &str) -> bool {
///         check_key(package, key)
///     }
/// }
///
/// impl HubHandler for MyHandler {
///     async fn deliver_recovery(
///         &self,
///         webhook_url: &str,
///         notification: &RecoveryNotification,
///     ) -> Result<(), String> {
///         post_json(webhook_url, notification).await.map_err(|e| e.to_string())
///     }
/// }
/// ```
pub trait HubHandler: AccessPolicy {
    /// POST a recovery notification to an app server's webhook
    ///
    /// An `Err` is retried by the hub up to its configured attempt limit.
    fn deliver_recovery(
        &self,
        webhook_url: &str,
        notification: &RecoveryNotification,
    ) -> impl Future<Output = Result<(), String>> + Send;
}

/// In-memory [`AccessPolicy`] built from static tables
///
/// Useful for demos and tests. Apps with no declared permissions may not
/// subscribe to anything.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    users: HashMap<String, UserId>,
    app_keys: HashMap<PackageName, String>,
    permissions: HashMap<PackageName, HashSet<Subscription>>,
    kinds: HashMap<PackageName, AppKind>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `core_token` as the given user
    pub fn user(mut self, core_token: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        self.users.insert(core_token.into(), user_id.into());
        self
    }

    /// Register an app with its API key, kind and declared subscriptions
    pub fn app(
        mut self,
        package: impl Into<PackageName>,
        api_key: impl Into<String>,
        kind: AppKind,
        permissions: impl IntoIterator<Item = Subscription>,
    ) -> Self {
        let package = package.into();
        self.app_keys.insert(package.clone(), api_key.into());
        self.kinds.insert(package.clone(), kind);
        self.permissions
            .insert(package, permissions.into_iter().collect());
        self
    }
}

impl AccessPolicy for StaticPolicy {
    fn validate_core_token(&self, core_token: &str) -> Option<UserId> {
        self.users.get(core_token).cloned()
    }

    fn validate_app_key(&self, package: &PackageName, api_key: &str) -> bool {
        self.app_keys.get(package).is_some_and(|key| key == api_key)
    }

    fn is_permitted(&self, package: &PackageName, subscription: &Subscription) -> bool {
        self.permissions
            .get(package)
            .is_some_and(|declared| declared.contains(&Subscription::All) || declared.contains(subscription))
    }

    fn app_kind(&self, package: &PackageName) -> AppKind {
        self.kinds.get(package).copied().unwrap_or(AppKind::Standard)
    }
}
