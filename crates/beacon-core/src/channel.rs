//! Channels.
//!
//! A [`Channel`] is a named subscription on the shared transport. It keeps
//! track of the listeners it registered so they can be removed as a group,
//! and of its subscription state so re-subscribing after a reconnect happens
//! once per session.

use beacon_protocol::{Credential, CLIENT_EVENT_PREFIX};
use beacon_transport::{
    ClientEvent, LifecycleEvent, ListenerId, RawEvent, Transport, TransportError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::auth::Authorizer;
use crate::error::{BeaconError, Result};
use crate::formatter::EventFormatter;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Validate a logical channel name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_channel_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.starts_with(ChannelKind::Private.prefix())
        || name.starts_with(ChannelKind::Presence.prefix())
    {
        return Err("Channel names starting with 'private-' or 'presence-' are reserved");
    }
    // Check for valid ASCII printable characters
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Open to anyone.
    Public,
    /// Requires authorization.
    Private,
    /// Requires authorization and tracks members.
    Presence,
}

impl ChannelKind {
    /// Every kind, in decoration order.
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::Public,
        ChannelKind::Private,
        ChannelKind::Presence,
    ];

    /// Prefix that marks a channel key as this kind.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            ChannelKind::Public => "",
            ChannelKind::Private => "private-",
            ChannelKind::Presence => "presence-",
        }
    }

    /// The registry key and wire name of the logical channel `base`.
    #[must_use]
    pub fn decorate(self, base: &str) -> String {
        format!("{}{base}", self.prefix())
    }

    /// The kind a decorated key belongs to.
    #[must_use]
    pub fn of(key: &str) -> ChannelKind {
        if key.starts_with(ChannelKind::Presence.prefix()) {
            ChannelKind::Presence
        } else if key.starts_with(ChannelKind::Private.prefix()) {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    /// Whether subscribing needs a credential.
    #[must_use]
    pub fn requires_auth(self) -> bool {
        self != ChannelKind::Public
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::Public => "public",
            ChannelKind::Private => "private",
            ChannelKind::Presence => "presence",
        };
        f.write_str(s)
    }
}

/// Subscription state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No subscribe request has been sent, or the channel was unsubscribed.
    Unsubscribed,
    /// Authorizing or sending the subscribe request for this session.
    Pending { session_id: String },
    /// The subscribe request was sent on this session.
    Subscribed { session_id: String },
    /// The last attempt failed; the next (re)connect tries again.
    Failed,
}

/// Callback for subscription errors.
pub type ErrorCallback = Arc<dyn Fn(&BeaconError) + Send + Sync>;

/// Everything a channel needs from the connector that created it.
#[derive(Clone)]
pub(crate) struct ChannelContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) formatter: EventFormatter,
    pub(crate) runtime: Handle,
}

struct ChannelInner {
    name: String,
    kind: ChannelKind,
    context: ChannelContext,
    state: Mutex<SubscriptionState>,
    /// Formatted event name to the listeners registered by `listen`.
    bindings: Mutex<HashMap<String, Vec<ListenerId>>>,
    /// Internal listeners: the reconnect hook and presence bookkeeping.
    hooks: Mutex<Vec<ListenerId>>,
    error_callbacks: Mutex<Vec<ErrorCallback>>,
}

/// A subscription to one channel.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(name: String, kind: ChannelKind, context: ChannelContext) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name,
                kind,
                context,
                state: Mutex::new(SubscriptionState::Unsubscribed),
                bindings: Mutex::new(HashMap::new()),
                hooks: Mutex::new(Vec::new()),
                error_callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Full channel name, including the kind prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.inner.state.lock().clone()
    }

    /// Whether a subscribe request was sent on the current session.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        let session_id = self.inner.context.transport.session_id();
        matches!(
            &*self.inner.state.lock(),
            SubscriptionState::Subscribed { session_id: s } if Some(s) == session_id.as_ref()
        )
    }

    pub(crate) fn downgrade(&self) -> WeakChannel {
        WeakChannel(Arc::downgrade(&self.inner))
    }

    /// Whether both handles refer to the same channel.
    #[must_use]
    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Listen for `event` on this channel.
    ///
    /// The name is formatted with the connector's namespace. Callbacks for
    /// the same event run in registration order.
    pub fn listen<F>(&self, event: &str, callback: F) -> &Self
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        let formatted = self.inner.context.formatter.format(event);
        let id = self.bind(&formatted, callback);
        debug!(channel = %self.inner.name, event = %formatted, "Listening");
        self.inner
            .bindings
            .lock()
            .entry(formatted)
            .or_default()
            .push(id);
        self
    }

    /// Remove every listener registered for `event`.
    pub fn stop_listening(&self, event: &str) -> &Self {
        let formatted = self.inner.context.formatter.format(event);
        let ids = self.inner.bindings.lock().remove(&formatted);
        for id in ids.into_iter().flatten() {
            self.inner.context.transport.off(id);
        }
        self
    }

    /// Listen for a client event sent with [`Channel::whisper`].
    pub fn listen_for_whisper<F>(&self, event: &str, callback: F) -> &Self
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        self.listen(&format!(".{CLIENT_EVENT_PREFIX}{event}"), callback)
    }

    /// Stop listening for a client event.
    pub fn stop_listening_for_whisper(&self, event: &str) -> &Self {
        self.stop_listening(&format!(".{CLIENT_EVENT_PREFIX}{event}"))
    }

    /// Send a client event to the other subscribers.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InvalidChannel`] on public channels,
    /// [`BeaconError::NotConnected`] without a live session.
    pub fn whisper(&self, event: &str, data: serde_json::Value) -> Result<&Self> {
        if !self.inner.kind.requires_auth() {
            return Err(BeaconError::InvalidChannel(
                "client events need a private or presence channel",
            ));
        }
        self.inner
            .context
            .transport
            .whisper(&self.inner.name, event, data)?;
        Ok(self)
    }

    /// Register a callback for subscription errors.
    pub fn error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&BeaconError) + Send + Sync + 'static,
    {
        self.inner.error_callbacks.lock().push(Arc::new(callback));
        self
    }

    /// Subscribe on the current session, authorizing first when needed.
    ///
    /// Returns once the request has been sent. Already subscribed on this
    /// session is a no-op.
    ///
    /// # Errors
    ///
    /// [`BeaconError::NotConnected`] without a live session,
    /// [`BeaconError::Auth`] if authorization fails.
    pub async fn subscribe(&self) -> Result<()> {
        let session_id = self
            .inner
            .context
            .transport
            .session_id()
            .ok_or(BeaconError::NotConnected)?;
        if self.is_subscribed() {
            return Ok(());
        }
        *self.inner.state.lock() = SubscriptionState::Pending {
            session_id: session_id.clone(),
        };
        self.inner.subscribe_on(session_id).await
    }

    /// Unsubscribe and drop every listener and error callback.
    ///
    /// Nothing is sent without a live session.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the request could not be queued.
    pub fn unsubscribe(&self) -> Result<()> {
        let inner = &self.inner;
        let mut ids: Vec<ListenerId> = inner
            .bindings
            .lock()
            .drain()
            .flat_map(|(_, ids)| ids)
            .collect();
        ids.append(&mut *inner.hooks.lock());
        for id in ids {
            inner.context.transport.off(id);
        }
        inner.error_callbacks.lock().clear();
        *inner.state.lock() = SubscriptionState::Unsubscribed;

        debug!(channel = %inner.name, "Unsubscribing");
        match inner.context.transport.unsubscribe(&inner.name) {
            Ok(()) | Err(TransportError::NotConnected) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Register a listener scoped to this channel that `unsubscribe` removes
    /// but `stop_listening` does not.
    pub(crate) fn bind_raw<F>(&self, event: &str, callback: F)
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        let id = self.bind(event, callback);
        self.inner.hooks.lock().push(id);
    }

    fn bind<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        let name = self.inner.name.clone();
        self.inner.context.transport.on(
            event,
            Arc::new(move |raw: &RawEvent| {
                if raw.is_for(&name) {
                    callback(raw);
                }
            }),
        )
    }

    /// Subscribe now if connected and again after every (re)connect.
    pub(crate) fn start(&self) {
        let weak = Arc::downgrade(&self.inner);
        let id = self.inner.context.transport.on_client_event(
            ClientEvent::Connect,
            Arc::new(move |_: &LifecycleEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.request_subscribe();
                }
            }),
        );
        self.inner.hooks.lock().push(id);
        self.inner.request_subscribe();
    }
}

/// Non-owning [`Channel`] handle.
#[derive(Clone)]
pub(crate) struct WeakChannel(Weak<ChannelInner>);

impl WeakChannel {
    pub(crate) fn upgrade(&self) -> Option<Channel> {
        self.0.upgrade().map(|inner| Channel { inner })
    }
}

impl ChannelInner {
    /// Subscribe on the current session unless that already happened or is
    /// in flight. Never blocks; authorization runs on a spawned task.
    fn request_subscribe(self: &Arc<Self>) {
        let Some(session_id) = self.context.transport.session_id() else {
            debug!(channel = %self.name, "Waiting for a session before subscribing");
            return;
        };

        {
            let mut state = self.state.lock();
            match &*state {
                SubscriptionState::Pending { session_id: s }
                | SubscriptionState::Subscribed { session_id: s }
                    if *s == session_id =>
                {
                    return;
                }
                _ => {}
            }
            *state = SubscriptionState::Pending {
                session_id: session_id.clone(),
            };
        }

        if self.kind.requires_auth() {
            let inner = Arc::clone(self);
            self.context.runtime.spawn(async move {
                // Failures are reported through the error callbacks.
                let _ = inner.subscribe_on(session_id).await;
            });
        } else {
            let _ = self.send_subscribe(&session_id, None);
        }
    }

    async fn subscribe_on(&self, session_id: String) -> Result<()> {
        let credential = if self.kind.requires_auth() {
            match self.context.authorizer.authorize(&self.name, &session_id).await {
                Ok(credential) => Some(credential),
                Err(e) => return Err(self.fail(e.into())),
            }
        } else {
            None
        };
        self.send_subscribe(&session_id, credential)
    }

    /// Queue the subscribe request and mark the session subscribed in one
    /// step, so concurrent callers send at most one request per session.
    fn send_subscribe(&self, session_id: &str, credential: Option<Credential>) -> Result<()> {
        let mut state = self.state.lock();
        // Unsubscribed, already sent, or superseded by a newer session.
        if !matches!(&*state, SubscriptionState::Pending { session_id: s } if s == session_id) {
            debug!(channel = %self.name, session_id, "Dropping stale subscribe");
            return Ok(());
        }

        if let Err(e) = self.context.transport.subscribe(&self.name, credential) {
            drop(state);
            return Err(self.fail(e.into()));
        }
        *state = SubscriptionState::Subscribed {
            session_id: session_id.to_string(),
        };
        drop(state);

        debug!(channel = %self.name, kind = %self.kind, session_id, "Subscribed");
        Ok(())
    }

    fn fail(&self, error: BeaconError) -> BeaconError {
        *self.state.lock() = SubscriptionState::Failed;
        warn!(channel = %self.name, error = %error, "Subscription failed");

        let callbacks = self.error_callbacks.lock().clone();
        for callback in callbacks {
            callback(&error);
        }
        error
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::AuthError;
    use async_trait::async_trait;
    use beacon_transport::{MockTransport, TransportCall};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct StaticAuthorizer;

    #[async_trait]
    impl Authorizer for StaticAuthorizer {
        async fn authorize(
            &self,
            channel: &str,
            socket_id: &str,
        ) -> std::result::Result<Credential, AuthError> {
            Ok(Credential::new(format!("{socket_id}:{channel}")))
        }
    }

    pub(crate) fn context(mock: &Arc<MockTransport>) -> ChannelContext {
        ChannelContext {
            transport: Arc::clone(mock) as Arc<dyn Transport>,
            authorizer: Arc::new(StaticAuthorizer),
            formatter: EventFormatter::new("App.Events"),
            runtime: Handle::current(),
        }
    }

    #[test]
    fn test_decorate_and_kind_of() {
        assert_eq!(ChannelKind::Public.decorate("orders"), "orders");
        assert_eq!(ChannelKind::Private.decorate("orders"), "private-orders");
        assert_eq!(ChannelKind::Presence.decorate("orders"), "presence-orders");

        for kind in ChannelKind::ALL {
            assert_eq!(ChannelKind::of(&kind.decorate("orders")), kind);
        }
        assert!(!ChannelKind::Public.requires_auth());
        assert!(ChannelKind::Presence.requires_auth());
    }

    #[test]
    fn test_validate_channel_name() {
        assert!(validate_channel_name("orders.1").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("private-orders").is_err());
        assert!(validate_channel_name("presence-room").is_err());
        assert!(validate_channel_name("caf\u{e9}").is_err());
        assert!(validate_channel_name(&"a".repeat(MAX_CHANNEL_NAME_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn test_listen_filters_by_channel_and_formats_name() {
        let mock = Arc::new(MockTransport::new());
        let channel = Channel::new("orders".into(), ChannelKind::Public, context(&mock));

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        channel.listen("OrderShipped", move |_: &RawEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        mock.emit(RawEvent::new("App\\Events\\OrderShipped", "orders", json!({})));
        mock.emit(RawEvent::new("App\\Events\\OrderShipped", "invoices", json!({})));
        mock.emit(RawEvent::new("OrderShipped", "orders", json!({})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        channel.stop_listening("OrderShipped");
        mock.emit(RawEvent::new("App\\Events\\OrderShipped", "orders", json!({})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Unknown event is a no-op.
        channel.stop_listening("Nothing");
    }

    #[tokio::test]
    async fn test_public_channel_subscribes_once_per_session() {
        let mock = Arc::new(MockTransport::new());
        let channel = Channel::new("orders".into(), ChannelKind::Public, context(&mock));

        channel.start();
        assert_eq!(channel.state(), SubscriptionState::Unsubscribed);
        assert!(mock.subscribes().is_empty());

        mock.accept("s-1");
        assert!(channel.is_subscribed());
        channel.inner.request_subscribe();
        assert_eq!(mock.subscribes(), vec!["orders".to_string()]);

        mock.drop_connection("gone");
        assert!(!channel.is_subscribed());
        mock.accept("s-2");
        assert_eq!(mock.subscribes().len(), 2);
        assert_eq!(
            channel.state(),
            SubscriptionState::Subscribed {
                session_id: "s-2".into()
            }
        );
    }

    #[tokio::test]
    async fn test_private_subscribe_attaches_credential() {
        let mock = Arc::new(MockTransport::new());
        mock.accept("s-1");
        let channel = Channel::new(
            "private-orders".into(),
            ChannelKind::Private,
            context(&mock),
        );

        channel.subscribe().await.unwrap();
        assert_eq!(
            mock.calls(),
            vec![TransportCall::Subscribe {
                channel: "private-orders".into(),
                credential: Some(Credential::new("s-1:private-orders")),
            }]
        );

        // Second call on the same session sends nothing.
        channel.subscribe().await.unwrap();
        assert_eq!(mock.calls().len(), 1);
    }

    /// Releases authorizations only in pairs.
    struct GatedAuthorizer {
        gate: tokio::sync::Barrier,
    }

    #[async_trait]
    impl Authorizer for GatedAuthorizer {
        async fn authorize(
            &self,
            channel: &str,
            socket_id: &str,
        ) -> std::result::Result<Credential, AuthError> {
            self.gate.wait().await;
            Ok(Credential::new(format!("{socket_id}:{channel}")))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_explicit_subscribe_racing_start_sends_once() {
        for round in 0..50 {
            let mock = Arc::new(MockTransport::new());
            mock.accept("s-1");
            let mut gated = context(&mock);
            gated.authorizer = Arc::new(GatedAuthorizer {
                gate: tokio::sync::Barrier::new(2),
            });
            let channel = Channel::new("private-orders".into(), ChannelKind::Private, gated);

            // start() authorizes on a spawned task; subscribe() authorizes
            // inline. Both are released together.
            channel.start();
            channel.subscribe().await.unwrap();
            for _ in 0..100 {
                if mock.subscribes().len() > 1 {
                    break;
                }
                tokio::task::yield_now().await;
            }

            assert_eq!(
                mock.subscribes(),
                vec!["private-orders".to_string()],
                "round {round}"
            );
            assert!(channel.is_subscribed());
        }
    }

    #[tokio::test]
    async fn test_subscribe_without_session() {
        let mock = Arc::new(MockTransport::new());
        let channel = Channel::new("orders".into(), ChannelKind::Public, context(&mock));
        assert!(matches!(
            channel.subscribe().await,
            Err(BeaconError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_whisper() {
        let mock = Arc::new(MockTransport::new());
        mock.accept("s-1");

        let public = Channel::new("orders".into(), ChannelKind::Public, context(&mock));
        assert!(matches!(
            public.whisper("typing", json!({})),
            Err(BeaconError::InvalidChannel(_))
        ));

        let private = Channel::new("private-chat".into(), ChannelKind::Private, context(&mock));
        private.whisper("typing", json!({ "name": "ada" })).unwrap();
        assert_eq!(
            mock.calls(),
            vec![TransportCall::Whisper {
                channel: "private-chat".into(),
                event: "typing".into(),
                data: json!({ "name": "ada" }),
            }]
        );

        let typed = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&typed);
        private.listen_for_whisper("typing", move |_: &RawEvent| {
            t.fetch_add(1, Ordering::SeqCst);
        });
        mock.emit(RawEvent::new("client-typing", "private-chat", json!({})));
        assert_eq!(typed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_listeners_and_hooks() {
        let mock = Arc::new(MockTransport::new());
        mock.accept("s-1");
        let channel = Channel::new("orders".into(), ChannelKind::Public, context(&mock));
        channel.start();
        channel.listen("OrderShipped", |_: &RawEvent| {});
        channel.listen("OrderPaid", |_: &RawEvent| {});
        let before = mock.dispatcher().total_listeners();
        assert_eq!(before, 3);

        channel.unsubscribe().unwrap();
        assert_eq!(mock.dispatcher().total_listeners(), 0);
        assert_eq!(mock.unsubscribes(), vec!["orders".to_string()]);
        assert_eq!(channel.state(), SubscriptionState::Unsubscribed);

        // Reconnect no longer resubscribes.
        mock.drop_connection("gone");
        mock.accept("s-2");
        assert_eq!(mock.subscribes().len(), 1);
    }
}
