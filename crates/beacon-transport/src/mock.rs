//! In-memory transport for tests.
//!
//! `MockTransport` records every request instead of sending it and lets a
//! test play the server: complete or stall the handshake, push raw events and
//! presence changes, drop the connection.

use async_trait::async_trait;
use beacon_protocol::{Credential, Member, PresenceAction};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::dispatch::Dispatcher;
use crate::traits::{
    ConnectionState, LifecycleEvent, RawEvent, Transport, TransportConfig, TransportError,
};

/// A request recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Subscribe {
        channel: String,
        credential: Option<Credential>,
    },
    Unsubscribe {
        channel: String,
    },
    Whisper {
        channel: String,
        event: String,
        data: serde_json::Value,
    },
}

/// Transport that talks to no one.
#[derive(Debug)]
pub struct MockTransport {
    config: Option<TransportConfig>,
    dispatcher: Dispatcher,
    state: Mutex<ConnectionState>,
    session_id: RwLock<Option<String>>,
    calls: Mutex<Vec<TransportCall>>,
    stall_connect: AtomicBool,
    connect_attempts: AtomicU64,
    has_connected: AtomicBool,
}

impl MockTransport {
    /// Create a disconnected mock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            dispatcher: Dispatcher::new(),
            state: Mutex::new(ConnectionState::Disconnected),
            session_id: RwLock::new(None),
            calls: Mutex::new(Vec::new()),
            stall_connect: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            has_connected: AtomicBool::new(false),
        }
    }

    /// Create a disconnected mock that remembers the config it was built from.
    #[must_use]
    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::new()
        }
    }

    /// The config passed to [`MockTransport::with_config`].
    #[must_use]
    pub fn config(&self) -> Option<&TransportConfig> {
        self.config.as_ref()
    }

    /// Make `connect` wait out its whole timeout and then fail.
    pub fn stall_connect(&self, stall: bool) {
        self.stall_connect.store(stall, Ordering::SeqCst);
    }

    /// Number of `connect` calls that started a handshake.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Complete a handshake with the given session id.
    pub fn accept(&self, session_id: &str) {
        *self.state.lock() = ConnectionState::Connected;
        *self.session_id.write() = Some(session_id.to_string());

        let reconnect = self.has_connected.swap(true, Ordering::SeqCst);
        self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Connected {
            session_id: session_id.to_string(),
        });
        if reconnect {
            self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Reconnected {
                session_id: session_id.to_string(),
            });
        }
    }

    /// Simulate the server closing the connection.
    pub fn drop_connection(&self, reason: &str) {
        if self.close() {
            self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Drop the session. Returns whether one was open.
    fn close(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Disconnected);
        self.session_id.write().take();
        previous == ConnectionState::Connected
    }

    /// Deliver a raw event as if the server sent it.
    pub fn emit(&self, event: RawEvent) -> usize {
        self.dispatcher.dispatch(&event)
    }

    /// Deliver a presence change the way the WebSocket transport surfaces it.
    pub fn emit_presence(&self, channel: &str, action: PresenceAction, members: Vec<Member>) -> usize {
        let data = match action {
            PresenceAction::Here => serde_json::to_value(members),
            _ => serde_json::to_value(members.into_iter().next()),
        }
        .unwrap_or(serde_json::Value::Null);
        self.emit(RawEvent::new(action.event_name(), channel, data))
    }

    /// Deliver a lifecycle event.
    pub fn emit_lifecycle(&self, event: LifecycleEvent) -> usize {
        self.dispatcher.dispatch_lifecycle(&event)
    }

    /// Every request recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Channels passed to `subscribe`, in order.
    #[must_use]
    pub fn subscribes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { channel, .. } => Some(channel.clone()),
                _ => None,
            })
            .collect()
    }

    /// Channels passed to `unsubscribe`, in order.
    #[must_use]
    pub fn unsubscribes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Unsubscribe { channel } => Some(channel.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded requests.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: TransportCall) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, timeout: Duration) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Disconnected {
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if self.stall_connect.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            *self.state.lock() = ConnectionState::Disconnected;
            let error = TransportError::Timeout(timeout);
            self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Error {
                message: error.to_string(),
            });
            return Err(error);
        }

        self.accept(&format!("mock.{attempt}"));
        Ok(())
    }

    fn disconnect(&self) {
        if self.close() {
            self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Disconnected {
                reason: "client disconnect".into(),
            });
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn subscribe(
        &self,
        channel: &str,
        credential: Option<Credential>,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Subscribe {
            channel: channel.to_string(),
            credential,
        })
    }

    fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.record(TransportCall::Unsubscribe {
            channel: channel.to_string(),
        })
    }

    fn whisper(
        &self,
        channel: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Whisper {
            channel: channel.to_string(),
            event: event.to_string(),
            data,
        })
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
