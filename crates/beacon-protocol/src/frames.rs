//! Frame types for the Beacon protocol.
//!
//! Every frame is an internally tagged object (`{"type": "subscribe", ...}`),
//! so the same definitions serve both the JSON text encoding and the
//! MessagePack binary encoding.

use serde::{Deserialize, Deserializer, Serialize};

/// Raw event name carrying the initial member list of a presence channel.
pub const PRESENCE_SUBSCRIBED: &str = "presence:subscribed";
/// Raw event name for a member joining a presence channel.
pub const PRESENCE_JOINING: &str = "presence:joining";
/// Raw event name for a member leaving a presence channel.
pub const PRESENCE_LEAVING: &str = "presence:leaving";
/// Raw event name for a member updating its info.
pub const PRESENCE_UPDATED: &str = "presence:updated";

/// Prefix the server expects on whispered (client-originated) events.
pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// Presence action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    /// Full member list, sent once after a successful subscribe.
    Here,
    /// A member joined the channel.
    Join,
    /// A member left the channel.
    Leave,
    /// A member changed its info.
    Update,
}

impl PresenceAction {
    /// The raw event name this action is surfaced as on the client.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            PresenceAction::Here => PRESENCE_SUBSCRIBED,
            PresenceAction::Join => PRESENCE_JOINING,
            PresenceAction::Leave => PRESENCE_LEAVING,
            PresenceAction::Update => PRESENCE_UPDATED,
        }
    }
}

/// Authorization returned by the auth endpoint and attached to a subscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Signature proving the subscription was authorized.
    pub auth: String,
    /// Member info for presence channels, as an encoded JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

impl Credential {
    /// Create a credential without channel data.
    #[must_use]
    pub fn new(auth: impl Into<String>) -> Self {
        Self {
            auth: auth.into(),
            channel_data: None,
        }
    }

    /// Attach presence channel data.
    #[must_use]
    pub fn with_channel_data(mut self, data: impl Into<String>) -> Self {
        self.channel_data = Some(data.into());
        self
    }
}

/// A member of a presence channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Member identifier. Numeric ids are accepted and kept as strings.
    #[serde(rename = "user_id", deserialize_with = "string_or_number")]
    pub id: String,
    /// Application-defined member info.
    #[serde(rename = "user_info", default)]
    pub info: serde_json::Value,
}

impl Member {
    /// Create a member with no info.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            info: serde_json::Value::Null,
        }
    }

    /// Attach member info.
    #[must_use]
    pub fn with_info(mut self, info: serde_json::Value) -> Self {
        self.info = info;
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Signed(n) => n.to_string(),
        Id::Unsigned(n) => n.to_string(),
    })
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Client handshake.
    Connect {
        /// Protocol version spoken by the client.
        version: u8,
        /// Application key, if the server requires one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },

    /// Server handshake response.
    Connected {
        /// Identifier of this connection, used for auth and exclusion.
        session_id: String,
        /// Protocol version spoken by the server.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Subscribe to a channel.
    Subscribe {
        /// Decorated channel name (`private-orders`, ...).
        channel: String,
        /// Credential for private and presence channels.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<Credential>,
    },

    /// Unsubscribe from a channel.
    Unsubscribe {
        /// Decorated channel name.
        channel: String,
    },

    /// An event broadcast by the server.
    Event {
        /// Channel the event was published on; `None` for connection-wide events.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        /// Event name, already namespaced by the publisher.
        event: String,
        /// Application payload.
        #[serde(default)]
        data: serde_json::Value,
    },

    /// A client event relayed to the other members of a channel.
    Whisper {
        /// Decorated channel name.
        channel: String,
        /// Event name including the `client-` prefix.
        event: String,
        /// Application payload.
        #[serde(default)]
        data: serde_json::Value,
    },

    /// Presence change on a presence channel.
    Presence {
        /// Decorated channel name.
        channel: String,
        /// What happened.
        action: PresenceAction,
        /// Affected members; the full list for `Here`, one member otherwise.
        #[serde(default)]
        members: Vec<Member>,
    },

    /// Error reported by the server.
    Error {
        /// Error code.
        code: u16,
        /// Human-readable message.
        message: String,
    },

    /// Keepalive ping.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Create a Connect frame for the current protocol version.
    #[must_use]
    pub fn connect(key: Option<String>) -> Self {
        Frame::Connect {
            version: crate::PROTOCOL_VERSION,
            key,
        }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(session_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            session_id: session_id.into(),
            version: crate::PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create a Subscribe frame.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>, auth: Option<Credential>) -> Self {
        Frame::Subscribe {
            channel: channel.into(),
            auth,
        }
    }

    /// Create an Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Create an Event frame scoped to a channel.
    #[must_use]
    pub fn event(
        channel: impl Into<String>,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Frame::Event {
            channel: Some(channel.into()),
            event: event.into(),
            data,
        }
    }

    /// Create a Whisper frame. The `client-` prefix is added when missing.
    #[must_use]
    pub fn whisper(channel: impl Into<String>, event: &str, data: serde_json::Value) -> Self {
        let event = if event.starts_with(CLIENT_EVENT_PREFIX) {
            event.to_string()
        } else {
            format!("{CLIENT_EVENT_PREFIX}{event}")
        };
        Frame::Whisper {
            channel: channel.into(),
            event,
            data,
        }
    }

    /// Create a Presence frame.
    #[must_use]
    pub fn presence(channel: impl Into<String>, action: PresenceAction, members: Vec<Member>) -> Self {
        Frame::Presence {
            channel: channel.into(),
            action,
            members,
        }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }

    /// Short name of the frame kind, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "connect",
            Frame::Connected { .. } => "connected",
            Frame::Subscribe { .. } => "subscribe",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::Event { .. } => "event",
            Frame::Whisper { .. } => "whisper",
            Frame::Presence { .. } => "presence",
            Frame::Error { .. } => "error",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_presence_action_event_names() {
        assert_eq!(PresenceAction::Here.event_name(), "presence:subscribed");
        assert_eq!(PresenceAction::Join.event_name(), "presence:joining");
        assert_eq!(PresenceAction::Leave.event_name(), "presence:leaving");
        assert_eq!(PresenceAction::Update.event_name(), "presence:updated");
    }

    #[test]
    fn test_subscribe_wire_shape() {
        let frame = Frame::subscribe(
            "private-orders",
            Some(Credential::new("key:signature")),
        );
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "subscribe",
                "channel": "private-orders",
                "auth": { "auth": "key:signature" }
            })
        );
    }

    #[test]
    fn test_member_accepts_numeric_id() {
        let member: Member =
            serde_json::from_value(json!({"user_id": 42, "user_info": {"name": "Ada"}})).unwrap();
        assert_eq!(member.id, "42");
        assert_eq!(member.info["name"], "Ada");

        let member: Member = serde_json::from_value(json!({"user_id": "u-7"})).unwrap();
        assert_eq!(member.id, "u-7");
        assert!(member.info.is_null());
    }

    #[test]
    fn test_whisper_prefix() {
        let frame = Frame::whisper("private-chat", "typing", json!({}));
        assert!(matches!(frame, Frame::Whisper { ref event, .. } if event == "client-typing"));

        let frame = Frame::whisper("private-chat", "client-typing", json!({}));
        assert!(matches!(frame, Frame::Whisper { ref event, .. } if event == "client-typing"));
    }

    #[test]
    fn test_event_without_channel() {
        let frame: Frame =
            serde_json::from_value(json!({"type": "event", "event": "maintenance"})).unwrap();
        assert_eq!(
            frame,
            Frame::Event {
                channel: None,
                event: "maintenance".into(),
                data: serde_json::Value::Null,
            }
        );
        assert_eq!(frame.kind(), "event");
    }
}
