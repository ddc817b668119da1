//! Display requests and their validation
//!
//! A [`DisplayRequest`] is a value object: once it passes validation it is
//! never mutated, only queued, shown, superseded or dropped.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use strum::{EnumString, IntoStaticStr};
use thiserror::Error;
use tokio::time::Instant;

use crate::protocol::PackageName;

/// Target view on the glasses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum View {
    Main,
    Dashboard,
    AlwaysOn,
}

/// Layout payload, opaque to the scheduler apart from its type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "layoutType", rename_all = "snake_case")]
pub enum Layout {
    TextWall {
        text: String,
    },
    DoubleTextWall {
        #[serde(rename = "topText")]
        top_text: String,
        #[serde(rename = "bottomText")]
        bottom_text: String,
    },
    ReferenceCard {
        title: String,
        text: String,
    },
    TextRows {
        text: Vec<String>,
    },
    BitmapView {
        data: String,
    },
}

impl Layout {
    /// Layout type tag
    pub fn kind(&self) -> &'static str {
        match self {
            Layout::TextWall { .. } => "text_wall",
            Layout::DoubleTextWall { .. } => "double_text_wall",
            Layout::ReferenceCard { .. } => "reference_card",
            Layout::TextRows { .. } => "text_rows",
            Layout::BitmapView { .. } => "bitmap_view",
        }
    }

    /// The empty layout sent to blank the display
    pub fn blank() -> Self {
        Layout::TextWall {
            text: String::new(),
        }
    }

    /// Text of a `text_wall` layout, if that is what this is
    pub fn text(&self) -> Option<&str> {
        match self {
            Layout::TextWall { text } => Some(text),
            _ => None,
        }
    }

    fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let Value::Object(fields) = value else {
            return Err(ValidationError::MissingLayout);
        };

        let kind = match fields.get("layoutType") {
            Some(Value::String(kind)) => kind.as_str(),
            _ => return Err(ValidationError::MissingLayoutType),
        };

        let text = |layout: &'static str, field: &'static str| -> Result<String, ValidationError> {
            fields
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(ValidationError::MissingField { layout, field })
        };

        match kind {
            "text_wall" => Ok(Layout::TextWall {
                text: text("text_wall", "text")?,
            }),
            "double_text_wall" => Ok(Layout::DoubleTextWall {
                top_text: text("double_text_wall", "topText")?,
                bottom_text: text("double_text_wall", "bottomText")?,
            }),
            "reference_card" => Ok(Layout::ReferenceCard {
                title: text("reference_card", "title")?,
                text: text("reference_card", "text")?,
            }),
            "text_rows" => {
                let rows = fields
                    .get("text")
                    .and_then(Value::as_array)
                    .and_then(|rows| {
                        rows.iter()
                            .map(|row| row.as_str().map(str::to_owned))
                            .collect::<Option<Vec<_>>>()
                    })
                    .ok_or(ValidationError::MissingField {
                        layout: "text_rows",
                        field: "text",
                    })?;
                Ok(Layout::TextRows { text: rows })
            }
            "bitmap_view" => Ok(Layout::BitmapView {
                data: text("bitmap_view", "data")?,
            }),
            other => Err(ValidationError::UnknownLayoutType(other.to_owned())),
        }
    }
}

/// Reason a display request was rejected before reaching any queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("display request has no view")]
    MissingView,
    #[error("unknown view: {0}")]
    UnknownView(String),
    #[error("display request has no layout")]
    MissingLayout,
    #[error("layout has no layoutType")]
    MissingLayoutType,
    #[error("unknown layout type: {0}")]
    UnknownLayoutType(String),
    #[error("{layout} layout is missing `{field}`")]
    MissingField {
        layout: &'static str,
        field: &'static str,
    },
    #[error("durationMs must be a positive integer")]
    InvalidDuration,
    #[error("forceDisplay must be a boolean")]
    InvalidForceDisplay,
}

/// A request for the exclusive display surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRequest {
    /// App that submitted the request
    pub package_name: PackageName,
    /// Target view
    pub view: View,
    /// Layout to render
    pub layout: Layout,
    /// Auto-clear after this long; `None` persists until replaced
    pub duration: Option<Duration>,
    /// Take the background lock from another app
    pub force_display: bool,
    /// When the request entered the hub
    pub submitted_at: Instant,
}

impl DisplayRequest {
    /// Build a request from an app's `display_request` payload
    pub fn from_payload(
        package_name: PackageName,
        payload: &Map<String, Value>,
        now: Instant,
    ) -> Result<Self, ValidationError> {
        let view = match payload.get("view") {
            Some(Value::String(view)) => {
                View::from_str(view).map_err(|_| ValidationError::UnknownView(view.clone()))?
            }
            _ => return Err(ValidationError::MissingView),
        };

        let layout = match payload.get("layout") {
            Some(layout) => Layout::from_value(layout)?,
            None => return Err(ValidationError::MissingLayout),
        };

        let duration = match payload.get("durationMs") {
            None | Some(Value::Null) => None,
            Some(value) => match value.as_u64() {
                Some(ms) if ms > 0 => Some(Duration::from_millis(ms)),
                _ => return Err(ValidationError::InvalidDuration),
            },
        };

        let force_display = match payload.get("forceDisplay") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(force)) => *force,
            Some(_) => return Err(ValidationError::InvalidForceDisplay),
        };

        Ok(Self {
            package_name,
            view,
            layout,
            duration,
            force_display,
            submitted_at: now,
        })
    }

    /// Create a `text_wall` request on the main view
    pub fn text(package_name: impl Into<PackageName>, text: impl Into<String>, now: Instant) -> Self {
        Self {
            package_name: package_name.into(),
            view: View::Main,
            layout: Layout::TextWall { text: text.into() },
            duration: None,
            force_display: false,
            submitted_at: now,
        }
    }

    /// Set an auto-clear duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Mark the request as forced (takes the background lock)
    pub fn forced(mut self) -> Self {
        self.force_display = true;
        self
    }

    /// Target a different view
    pub fn on_view(mut self, view: View) -> Self {
        self.view = view;
        self
    }
}
