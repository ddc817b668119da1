//! Per-session connection registry
//!
//! Holds the glasses connection and one connection per attached app. Only
//! this type touches connection handles; everything else addresses peers by
//! role or package name.

use std::collections::HashMap;

use tokio::time::Instant;

use super::error::ConnectionError;
use super::handle::ConnectionHandle;
use crate::protocol::{AppOutbound, GlassesOutbound, PackageName};

/// An app currently attached to the session
#[derive(Debug, Clone)]
pub struct AppConnection {
    pub handle: ConnectionHandle<AppOutbound>,
    pub attached_at: Instant,
}

impl AppConnection {
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }
}

/// Live connections for one session
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    glasses: Option<ConnectionHandle<GlassesOutbound>>,
    apps: HashMap<PackageName, AppConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the glasses connection, closing any previous one
    pub fn set_glasses(&mut self, handle: ConnectionHandle<GlassesOutbound>) {
        if let Some(old) = self.glasses.replace(handle) {
            old.close();
        }
    }

    /// Drop the glasses connection
    pub fn clear_glasses(&mut self) {
        if let Some(old) = self.glasses.take() {
            old.close();
        }
    }

    /// Drop the glasses connection only if `connection_id` is the current one
    ///
    /// A close reported by a socket that has since been replaced is ignored.
    pub fn clear_glasses_if(&mut self, connection_id: u64) -> bool {
        if self.glasses.as_ref().is_some_and(|h| h.id() == connection_id) {
            self.clear_glasses();
            return true;
        }
        false
    }

    pub fn glasses_connected(&self) -> bool {
        self.glasses.as_ref().is_some_and(|h| h.is_open())
    }

    pub fn send_to_glasses(&self, msg: GlassesOutbound) -> Result<(), ConnectionError> {
        match self.glasses {
            Some(ref handle) => handle.send(msg),
            None => Err(ConnectionError::NotConnected("glasses".into())),
        }
    }

    /// Attach an app connection
    ///
    /// A reconnecting app replaces its previous connection, which is closed.
    pub fn attach_app(&mut self, package: PackageName, handle: ConnectionHandle<AppOutbound>) {
        let conn = AppConnection {
            handle,
            attached_at: Instant::now(),
        };
        if let Some(old) = self.apps.insert(package, conn) {
            old.handle.close();
        }
    }

    /// Close and forget an app connection; returns whether one existed
    pub fn detach_app(&mut self, package: &str) -> bool {
        match self.apps.remove(package) {
            Some(conn) => {
                conn.handle.close();
                true
            }
            None => false,
        }
    }

    /// Detach an app only if `connection_id` is its current connection
    pub fn detach_app_if(&mut self, package: &str, connection_id: u64) -> bool {
        if self.apps.get(package).is_some_and(|c| c.handle.id() == connection_id) {
            return self.detach_app(package);
        }
        false
    }

    /// ID of the current connection for `package`
    pub fn app_connection_id(&self, package: &str) -> Option<u64> {
        self.apps.get(package).map(|c| c.handle.id())
    }

    pub fn is_app_open(&self, package: &str) -> bool {
        self.apps.get(package).is_some_and(AppConnection::is_open)
    }

    pub fn send_to_app(&self, package: &str, msg: AppOutbound) -> Result<(), ConnectionError> {
        match self.apps.get(package) {
            Some(conn) => conn.handle.send(msg),
            None => Err(ConnectionError::NotConnected(package.to_owned())),
        }
    }

    /// Number of attached apps
    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    /// Package names of attached apps
    pub fn app_packages(&self) -> impl Iterator<Item = &PackageName> {
        self.apps.keys()
    }

    /// Close every connection
    pub fn close_all(&mut self) {
        self.clear_glasses();
        for (_, conn) in self.apps.drain() {
            conn.handle.close();
        }
    }
}
