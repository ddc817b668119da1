//! Inbound message taxonomy
//!
//! Messages arrive as JSON envelopes `{ "type": ..., ...fields }`. Each sender
//! (glasses or app) has a closed set of type tags; anything else is rejected
//! with [`ProtocolError::UnknownMessageType`] instead of being dropped.

use std::str::FromStr;

use serde_json::{Map, Value};

use super::error::ProtocolError;
use super::ids::{now_ms, PackageName};
use super::stream::StreamType;

/// A typed sensor/phone event carrying its stream tag
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Stream tag used for subscription matching
    pub stream: StreamType,
    /// Event fields, with the `type` tag removed
    pub payload: Map<String, Value>,
    /// Sender timestamp (ms since epoch), or arrival time if absent
    pub timestamp: u64,
}

/// Message sent by the glasses (via the paired phone) to the cloud
#[derive(Debug, Clone, PartialEq)]
pub enum GlassesMessage {
    /// Handshake carrying the device's core token
    ConnectionInit { core_token: String },
    /// User asked to start an app
    StartApp { package_name: PackageName },
    /// User asked to stop an app
    StopApp { package_name: PackageName },
    /// Sensor or phone event to route to subscribers
    Event(StreamEvent),
}

impl GlassesMessage {
    /// Parse a JSON envelope
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (tag, mut fields) = split_envelope(raw)?;

        match tag.as_str() {
            "connection_init" => Ok(GlassesMessage::ConnectionInit {
                core_token: take_string(&mut fields, "coreToken", "connection_init")?,
            }),
            "start_app" => Ok(GlassesMessage::StartApp {
                package_name: take_string(&mut fields, "packageName", "start_app")?.into(),
            }),
            "stop_app" => Ok(GlassesMessage::StopApp {
                package_name: take_string(&mut fields, "packageName", "stop_app")?.into(),
            }),
            other => {
                let stream = StreamType::from_str(other)
                    .map_err(|_| ProtocolError::UnknownMessageType(other.to_owned()))?;
                let timestamp = fields
                    .get("timestamp")
                    .and_then(Value::as_u64)
                    .unwrap_or_else(now_ms);
                Ok(GlassesMessage::Event(StreamEvent {
                    stream,
                    payload: fields,
                    timestamp,
                }))
            }
        }
    }

    /// Type tag of this message, as it appears on the wire
    pub fn type_tag(&self) -> &'static str {
        match self {
            GlassesMessage::ConnectionInit { .. } => "connection_init",
            GlassesMessage::StartApp { .. } => "start_app",
            GlassesMessage::StopApp { .. } => "stop_app",
            GlassesMessage::Event(event) => event.stream.as_str(),
        }
    }
}

/// Message sent by an app to the cloud
#[derive(Debug, Clone, PartialEq)]
pub enum AppMessage {
    /// Handshake binding the app connection to an existing session
    ConnectionInit {
        package_name: PackageName,
        session_id: String,
        api_key: String,
    },
    /// Replace the app's subscription set
    SubscriptionUpdate {
        package_name: PackageName,
        subscriptions: Vec<String>,
    },
    /// Ask for display time; the payload is validated by the scheduler
    DisplayRequest {
        package_name: PackageName,
        payload: Map<String, Value>,
    },
}

impl AppMessage {
    /// Parse a JSON envelope
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (tag, mut fields) = split_envelope(raw)?;

        match tag.as_str() {
            "tpa_connection_init" | "connection_init" => Ok(AppMessage::ConnectionInit {
                package_name: take_string(&mut fields, "packageName", "connection_init")?.into(),
                session_id: take_string(&mut fields, "sessionId", "connection_init")?,
                api_key: take_string(&mut fields, "apiKey", "connection_init")?,
            }),
            "subscription_update" => {
                let package_name =
                    take_string(&mut fields, "packageName", "subscription_update")?.into();
                let subscriptions = match fields.remove("subscriptions") {
                    Some(Value::Array(items)) => items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(s) => Ok(s),
                            _ => Err(ProtocolError::InvalidField {
                                message_type: "subscription_update",
                                field: "subscriptions",
                            }),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => {
                        return Err(ProtocolError::InvalidField {
                            message_type: "subscription_update",
                            field: "subscriptions",
                        })
                    }
                };
                Ok(AppMessage::SubscriptionUpdate {
                    package_name,
                    subscriptions,
                })
            }
            "display_event" | "display_request" => Ok(AppMessage::DisplayRequest {
                package_name: take_string(&mut fields, "packageName", "display_request")?.into(),
                payload: fields,
            }),
            other => Err(ProtocolError::UnknownMessageType(other.to_owned())),
        }
    }

    /// Package name the message claims to come from
    pub fn package_name(&self) -> &PackageName {
        match self {
            AppMessage::ConnectionInit { package_name, .. }
            | AppMessage::SubscriptionUpdate { package_name, .. }
            | AppMessage::DisplayRequest { package_name, .. } => package_name,
        }
    }

    /// Type tag of this message, as it appears on the wire
    pub fn type_tag(&self) -> &'static str {
        match self {
            AppMessage::ConnectionInit { .. } => "tpa_connection_init",
            AppMessage::SubscriptionUpdate { .. } => "subscription_update",
            AppMessage::DisplayRequest { .. } => "display_request",
        }
    }

    /// Check that the message names the package bound to its connection
    pub fn ensure_from(&self, expected: &PackageName) -> Result<(), ProtocolError> {
        let actual = self.package_name();
        if actual == expected {
            Ok(())
        } else {
            Err(ProtocolError::PackageMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

fn split_envelope(raw: &str) -> Result<(String, Map<String, Value>), ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Value::Object(mut fields) = value else {
        return Err(ProtocolError::Malformed("envelope is not an object".into()));
    };

    match fields.remove("type") {
        Some(Value::String(tag)) => Ok((tag, fields)),
        _ => Err(ProtocolError::MissingType),
    }
}

fn take_string(
    fields: &mut Map<String, Value>,
    field: &'static str,
    message_type: &'static str,
) -> Result<String, ProtocolError> {
    match fields.remove(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(ProtocolError::InvalidField {
            message_type,
            field,
        }),
    }
}
