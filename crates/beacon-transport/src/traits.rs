//! Transport handle contract.
//!
//! A transport owns exactly one logical connection. Everything above it
//! (channels, the connector) talks to the server only through this trait.

use async_trait::async_trait;
use beacon_protocol::Credential;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::{Dispatcher, EventCallback, LifecycleCallback, ListenerId};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No live session; the request was not sent.
    #[error("Not connected")]
    NotConnected,

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection was not established in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// The server did not complete the session handshake.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server speaks a protocol version this client does not.
    #[error("Incompatible protocol version {0}")]
    IncompatibleVersion(u8),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] beacon_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Handshake completed; a session id is assigned.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Connection lifecycle event kinds, used as registration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    /// Every successful handshake, including reconnects.
    Connect,
    /// The connection was closed, locally or by the server.
    Disconnect,
    /// A successful handshake after an earlier one on the same transport.
    Reconnect,
    /// Connect failure, timeout, or an error frame from the server.
    Error,
}

/// A connection lifecycle event with its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected { session_id: String },
    Disconnected { reason: String },
    Reconnected { session_id: String },
    Error { message: String },
}

impl LifecycleEvent {
    /// The registration key for this event.
    #[must_use]
    pub fn kind(&self) -> ClientEvent {
        match self {
            LifecycleEvent::Connected { .. } => ClientEvent::Connect,
            LifecycleEvent::Disconnected { .. } => ClientEvent::Disconnect,
            LifecycleEvent::Reconnected { .. } => ClientEvent::Reconnect,
            LifecycleEvent::Error { .. } => ClientEvent::Error,
        }
    }
}

/// A named event delivered by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Event name as sent on the wire.
    pub event: String,
    /// Channel the event is scoped to, if any.
    pub channel: Option<String>,
    /// Event payload.
    pub data: serde_json::Value,
}

impl RawEvent {
    /// Create an event scoped to a channel.
    #[must_use]
    pub fn new(
        event: impl Into<String>,
        channel: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event: event.into(),
            channel: Some(channel.into()),
            data,
        }
    }

    /// Whether this event was published on `channel`.
    #[must_use]
    pub fn is_for(&self, channel: &str) -> bool {
        self.channel.as_deref() == Some(channel)
    }
}

/// Settings used to construct a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Server address (`ws://` or `wss://`).
    pub url: String,
    /// Application key sent in the handshake.
    pub key: Option<String>,
    /// Log every frame sent and received at debug level.
    pub log: bool,
    /// Use compact binary (MessagePack) frames instead of JSON text.
    pub compress: bool,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl TransportConfig {
    /// Create a config for `url` with default tuning.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: None,
            log: false,
            compress: false,
            max_message_size: 64 * 1024,
        }
    }
}

/// A single logical connection to a broadcasting server.
///
/// Requests that need a live session (`subscribe`, `unsubscribe`, `whisper`)
/// are queued without waiting and fail with [`TransportError::NotConnected`]
/// when there is none. Listener registration works in every state and
/// survives reconnects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection, giving up after `timeout`.
    ///
    /// A no-op when already connected or connecting. On failure the
    /// transport emits a lifecycle [`LifecycleEvent::Error`] and stays
    /// disconnected.
    async fn connect(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Close the connection. A no-op when not connected.
    fn disconnect(&self);

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Session id assigned by the server, while connected.
    fn session_id(&self) -> Option<String>;

    /// Request a subscription to `channel`.
    fn subscribe(&self, channel: &str, credential: Option<Credential>)
        -> Result<(), TransportError>;

    /// Request removal of the subscription to `channel`.
    fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;

    /// Send a client event to the other subscribers of `channel`.
    fn whisper(
        &self,
        channel: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Result<(), TransportError>;

    /// Callback tables for this transport.
    fn dispatcher(&self) -> &Dispatcher;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;

    /// Whether a session is live.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Register a callback for raw events named `event`.
    fn on(&self, event: &str, callback: EventCallback) -> ListenerId {
        self.dispatcher().on(event, callback)
    }

    /// Register a callback for a lifecycle event.
    fn on_client_event(&self, event: ClientEvent, callback: LifecycleCallback) -> ListenerId {
        self.dispatcher().on_client_event(event, callback)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    fn off(&self, listener: ListenerId) -> bool {
        self.dispatcher().off(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle_kind() {
        let event = LifecycleEvent::Reconnected {
            session_id: "s-1".into(),
        };
        assert_eq!(event.kind(), ClientEvent::Reconnect);
        assert_eq!(
            LifecycleEvent::Error {
                message: "boom".into()
            }
            .kind(),
            ClientEvent::Error
        );
    }

    #[test]
    fn test_raw_event_scope() {
        let event = RawEvent::new("Shipped", "orders", json!(null));
        assert!(event.is_for("orders"));
        assert!(!event.is_for("private-orders"));

        let global = RawEvent {
            event: "maintenance".into(),
            channel: None,
            data: json!(null),
        };
        assert!(!global.is_for("orders"));
    }

    #[test]
    fn test_transport_config_defaults() {
        let config = TransportConfig::new("ws://localhost:6001");
        assert!(!config.log);
        assert!(!config.compress);
        assert_eq!(config.max_message_size, 64 * 1024);
    }
}
