//! Inbound event classification and typed presence payloads.
//!
//! Frames are delivered to subscribers as raw `serde_json::Value` objects;
//! this module only inspects the `type` discriminator and offers typed
//! decoding for the presence shapes on demand.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Callback receiving decoded inbound events for a channel.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Bulk presence snapshot, broadcast when the roster changes.
pub const PRESENCE_UPDATE: &str = "presence_update";

/// Single user transition between online and offline.
pub const USER_PRESENCE: &str = "user_presence";

/// The `type` discriminator of an event, if it has one.
pub fn event_type(event: &Value) -> Option<&str> {
    event.get("type").and_then(Value::as_str)
}

/// Whether this event is a presence event.
///
/// Chat-channel subscribers never see presence events; the notifications
/// channel sees everything.
pub fn is_presence_event(event: &Value) -> bool {
    matches!(event_type(event), Some(PRESENCE_UPDATE | USER_PRESENCE))
}

/// Payload of a [`PRESENCE_UPDATE`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    #[serde(default)]
    pub online_users: Vec<String>,
}

impl PresenceUpdate {
    pub fn from_event(event: &Value) -> Option<Self> {
        if event_type(event) != Some(PRESENCE_UPDATE) {
            return None;
        }
        serde_json::from_value(event.clone()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

/// Payload of a [`USER_PRESENCE`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    pub email: String,
    pub event: PresenceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl PresenceChange {
    pub fn from_event(event: &Value) -> Option<Self> {
        if event_type(event) != Some(USER_PRESENCE) {
            return None;
        }
        serde_json::from_value(event.clone()).ok()
    }
}
