// ── Hub message types ──
//
// Device-to-cloud messages carry an opaque body plus application
// properties delivered out-of-band (content type, message schema).
// Cloud-to-device messages arrive as `InboundMessage` and must be
// acknowledged by id.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type tag attached to every JSON telemetry message.
pub const CONTENT_TYPE_JSON: &str = "json";

// ── MessageId ────────────────────────────────────────────────────────

/// Identifier the hub uses to correlate sends and acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Fresh random id (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── MessageProperties ────────────────────────────────────────────────

/// Application properties sent alongside the body.
///
/// Serialized under the hub's reserved `$$contentType` and
/// `$$MessageSchema` names; any other property is passed through as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    #[serde(rename = "$$contentType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(rename = "$$MessageSchema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(flatten)]
    pub custom: BTreeMap<String, String>,
}

impl MessageProperties {
    /// Properties for a JSON payload, optionally tagged with a schema.
    pub fn json(schema: Option<&str>) -> Self {
        Self {
            content_type: Some(CONTENT_TYPE_JSON.to_owned()),
            schema: schema.map(str::to_owned),
            custom: BTreeMap::new(),
        }
    }
}

// ── OutboundMessage ──────────────────────────────────────────────────

/// A device-to-cloud message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<Vec<u8>>, properties: MessageProperties) -> Self {
        Self {
            id: MessageId::generate(),
            body: body.into(),
            properties,
            created_at: Utc::now(),
        }
    }

    /// Serialize `payload` as JSON and tag it with `content-type=json`.
    pub fn json<T: Serialize>(payload: &T, schema: Option<&str>) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(payload)?;
        Ok(Self::new(body, MessageProperties::json(schema)))
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn schema(&self) -> Option<&str> {
        self.properties.schema.as_deref()
    }
}

// ── InboundMessage ───────────────────────────────────────────────────

/// A cloud-to-device message delivered on a connection's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub body: Vec<u8>,
    #[serde(default)]
    pub properties: MessageProperties,
}

impl InboundMessage {
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

// ── SendReceipt ──────────────────────────────────────────────────────

/// Hub acknowledgement of a device-to-cloud send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub enqueued_at: DateTime<Utc>,
}
