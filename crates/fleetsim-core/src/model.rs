// ── Domain model ──
//
// Per-device identity, connection status, readings, and the counters a
// device accumulates while it runs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use fleetsim_api::{ConnectionString, OutboundMessage, Protocol};

use crate::error::CoreError;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection status of a single device.
///
/// `Failed` is not terminal: the publish loop keeps ticking and skips
/// while the device cannot publish.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    pub fn can_publish(self) -> bool {
        self == Self::Connected
    }
}

/// One observed transition, broadcast to subscribers in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

// ── DeviceIdentity ───────────────────────────────────────────────────

/// Immutable identity of a simulated device.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub name: String,
    pub credential: ConnectionString,
    pub protocol: Protocol,
}

// ── Reading ──────────────────────────────────────────────────────────

/// A single generated sensor value.
///
/// Serializes to the wire payload `{"value": .., "time": ..}`; the schema
/// tag travels out-of-band as a message property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    #[serde(with = "iso_millis")]
    pub time: DateTime<Utc>,
    #[serde(skip)]
    pub schema: Option<String>,
}

impl Reading {
    /// Encode as a JSON hub message carrying this reading's schema tag.
    pub fn to_message(&self) -> Result<OutboundMessage, CoreError> {
        Ok(OutboundMessage::json(self, self.schema.as_deref())?)
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

// ── Tick outcome ─────────────────────────────────────────────────────

/// What a single publish-loop tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A reading was handed to the transport.
    Sent,
    /// The device is still connecting; nothing was sent.
    NotYetConnected,
    /// The device is disconnected or failed; nothing was sent.
    Unavailable(ConnectionState),
    /// Every in-flight slot was taken; the reading was dropped.
    Backlogged,
    /// The reading could not be encoded; it was dropped.
    EncodeFailed,
}

// ── Stats ────────────────────────────────────────────────────────────

/// Counters for one device. Only callbacks from the current handle
/// epoch contribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    /// Sends the hub accepted.
    pub sent: u64,
    pub send_errors: u64,
    /// Cloud-to-device messages received.
    pub received: u64,
    /// Unsolicited disconnects observed.
    pub reconnects: u64,
    /// Ticks that found the device unable to publish.
    pub skipped_ticks: u64,
    pub last_error: Option<String>,
}

/// Point-in-time view of a device, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub name: String,
    pub state: ConnectionState,
    #[serde(with = "millis")]
    pub interval: Duration,
    #[serde(flatten)]
    pub stats: DeviceStats,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn reading_payload_has_value_and_time_only() {
        let reading = Reading {
            value: 23.4,
            time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap(),
            schema: Some("temperature".into()),
        };
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "value": 23.4, "time": "2026-03-01T12:00:05.000Z" })
        );
    }

    #[test]
    fn reading_message_carries_schema_property() {
        let reading = Reading {
            value: 71.2,
            time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap(),
            schema: Some("humidity".into()),
        };
        let message = reading.to_message().unwrap();
        assert_eq!(message.schema(), Some("humidity"));
        assert!(message.body_str().contains("\"value\":71.2"));
    }

    #[test]
    fn only_connected_can_publish() {
        assert!(ConnectionState::Connected.can_publish());
        assert!(!ConnectionState::Connecting.can_publish());
        assert!(!ConnectionState::Failed.can_publish());
        assert!(!ConnectionState::Disconnected.can_publish());
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
