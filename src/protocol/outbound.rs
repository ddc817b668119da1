//! Outbound message taxonomy
//!
//! Messages the hub pushes to the glasses and to apps. [`GlassesOutbound`]
//! and [`AppOutbound`] can be encoded to the logical JSON envelope with
//! `encode()`; the transport that carries the bytes is not part of this crate.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::json;

use super::ids::{PackageName, SessionId};
use super::stream::StreamType;
use crate::display::{DisplayRequest, Layout, View};
use crate::subscription::SubscriptionRejection;

/// The winning display request as sent to the glasses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayEvent {
    /// App whose content this is
    pub package_name: PackageName,
    pub view: View,
    pub layout: Layout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl DisplayEvent {
    pub fn from_request(request: &DisplayRequest) -> Self {
        Self {
            package_name: request.package_name.clone(),
            view: request.view,
            layout: request.layout.clone(),
            duration_ms: request.duration.map(|d| d.as_millis() as u64),
        }
    }

    /// Blank the given view on behalf of the system
    pub fn blank(system_package: &PackageName, view: View) -> Self {
        Self {
            package_name: system_package.clone(),
            view,
            layout: Layout::blank(),
            duration_ms: None,
        }
    }
}

/// Message from the hub to the glasses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GlassesOutbound {
    ConnectionAck {
        session_id: SessionId,
        active_app_package_names: Vec<PackageName>,
    },
    ConnectionError {
        message: String,
    },
    DisplayEvent(DisplayEvent),
    AppStateChange {
        active_app_package_names: Vec<PackageName>,
        loading_apps: Vec<PackageName>,
    },
}

impl GlassesOutbound {
    /// Encode as a JSON text frame
    pub fn encode(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(buf) => Bytes::from(buf),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode glasses message");
                Bytes::new()
            }
        }
    }
}

/// Message from the hub to an app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppOutbound {
    ConnectionAck {
        session_id: SessionId,
    },
    ConnectionError {
        message: String,
    },
    /// The app was stopped on the glasses (or displaced by another app)
    AppStopped {
        reason: String,
    },
    /// A routed event; `data` is the pre-encoded JSON object shared by all
    /// recipients of the same broadcast
    DataStream {
        stream_type: StreamType,
        data: Bytes,
        timestamp: u64,
    },
    /// Some stream types in a subscription update were not applied
    SubscriptionError {
        rejected: Vec<SubscriptionRejection>,
    },
    /// A display request failed validation
    DisplayRejected {
        reason: String,
    },
}

impl AppOutbound {
    pub fn type_tag(&self) -> &'static str {
        match self {
            AppOutbound::ConnectionAck { .. } => "tpa_connection_ack",
            AppOutbound::ConnectionError { .. } => "tpa_connection_error",
            AppOutbound::AppStopped { .. } => "app_stopped",
            AppOutbound::DataStream { .. } => "data_stream",
            AppOutbound::SubscriptionError { .. } => "subscription_error",
            AppOutbound::DisplayRejected { .. } => "display_rejected",
        }
    }

    /// Encode as a JSON text frame
    ///
    /// `data_stream` frames splice the shared payload in without re-encoding it.
    pub fn encode(&self) -> Bytes {
        let tag = self.type_tag();
        let value = match self {
            AppOutbound::ConnectionAck { session_id } => {
                json!({"type": tag, "sessionId": session_id})
            }
            AppOutbound::ConnectionError { message } => json!({"type": tag, "message": message}),
            AppOutbound::AppStopped { reason } => json!({"type": tag, "reason": reason}),
            AppOutbound::SubscriptionError { rejected } => {
                json!({"type": tag, "rejected": rejected})
            }
            AppOutbound::DisplayRejected { reason } => json!({"type": tag, "reason": reason}),
            AppOutbound::DataStream {
                stream_type,
                data,
                timestamp,
            } => {
                let head = format!(
                    r#"{{"type":"{}","streamType":"{}","timestamp":{},"data":"#,
                    tag, stream_type, timestamp
                );
                let mut buf = BytesMut::with_capacity(head.len() + data.len() + 1);
                buf.put_slice(head.as_bytes());
                buf.put_slice(data);
                buf.put_u8(b'}');
                return buf.freeze();
            }
        };

        Bytes::from(value.to_string())
    }
}
