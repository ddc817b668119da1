//! Stream types used for subscription matching
//!
//! Every typed event the glasses (or the phone they are paired with) emit
//! carries one of these tags. Apps subscribe to a set of them; the special
//! wildcard subscription receives all of them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString, IntoStaticStr};

/// Category of event routed from the glasses to subscribed apps
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamType {
    ButtonPress,
    HeadPosition,
    GlassesBatteryUpdate,
    PhoneBatteryUpdate,
    GlassesConnectionState,
    LocationUpdate,
    CalendarEvent,
    PhoneNotification,
    CoreStatus,
    Vad,
    Transcription,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry in an app's subscription set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscription {
    /// Every stream type, present and future
    All,
    /// One specific stream type
    Stream(StreamType),
}

impl Subscription {
    /// Check whether this subscription covers the given stream type
    pub fn matches(&self, stream: StreamType) -> bool {
        match self {
            Subscription::All => true,
            Subscription::Stream(s) => *s == stream,
        }
    }
}

impl FromStr for Subscription {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" | "all" => Ok(Subscription::All),
            other => StreamType::from_str(other).map(Subscription::Stream),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::All => f.write_str("*"),
            Subscription::Stream(s) => s.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_stream_type_names_match_wire_tags() {
        assert_eq!(StreamType::ButtonPress.as_str(), "button_press");
        assert_eq!(StreamType::GlassesBatteryUpdate.as_str(), "glasses_battery_update");
        assert_eq!(
            StreamType::from_str("location_update").unwrap(),
            StreamType::LocationUpdate
        );
    }

    #[test]
    fn test_every_stream_type_parses_back() {
        for stream in StreamType::iter() {
            assert_eq!(StreamType::from_str(stream.as_str()).unwrap(), stream);
        }
    }

    #[test]
    fn test_subscription_wildcard() {
        assert_eq!(Subscription::from_str("*").unwrap(), Subscription::All);
        assert_eq!(Subscription::from_str("all").unwrap(), Subscription::All);
        assert!(Subscription::All.matches(StreamType::Vad));
        assert!(Subscription::from_str("telepathy").is_err());
    }
}
