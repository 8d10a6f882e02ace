//! The connector.
//!
//! A [`Connector`] owns the transport and the channel registry. It is the
//! entry point applications use: connect, hand out channels, leave them,
//! and disconnect.

use beacon_transport::{
    ClientEvent, ConnectionState, LifecycleEvent, ListenerId, RawEvent, Transport,
    TransportConfig, WebSocketTransport,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::auth::{Authorizer, HttpAuthorizer};
use crate::channel::{validate_channel_name, Channel, ChannelContext, ChannelKind};
use crate::error::{BeaconError, Result};
use crate::options::Options;
use crate::presence::PresenceChannel;
use crate::registry::{ChannelRegistry, RegisteredChannel};

/// Builds the transport for a connection.
pub type TransportFactory = Arc<dyn Fn(TransportConfig) -> Arc<dyn Transport> + Send + Sync>;

/// Client entry point.
pub struct Connector {
    options: RwLock<Options>,
    /// Transport, authorizer and runtime, set by the first `connect`.
    context: RwLock<Option<ChannelContext>>,
    registry: ChannelRegistry,
    factory: TransportFactory,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl Connector {
    /// Create a connector using the WebSocket transport.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self::with_transport_factory(options, |config| {
            Arc::new(WebSocketTransport::new(config)) as Arc<dyn Transport>
        })
    }

    /// Create a connector that builds its transport with `factory`.
    #[must_use]
    pub fn with_transport_factory<F>(options: Options, factory: F) -> Self
    where
        F: Fn(TransportConfig) -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        Self {
            options: RwLock::new(options),
            context: RwLock::new(None),
            registry: ChannelRegistry::new(),
            factory: Arc::new(factory),
            authorizer: None,
        }
    }

    /// Use `authorizer` instead of the HTTP auth endpoint.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Start connecting.
    ///
    /// Returns as soon as the attempt is under way. A timeout or failure is
    /// logged and reported as a [`ClientEvent::Error`] lifecycle event.
    /// Calling this while connected or connecting does nothing.
    ///
    /// # Errors
    ///
    /// [`BeaconError::Config`] if `host` is missing or malformed, in which
    /// case no transport is created. [`BeaconError::Runtime`] outside a
    /// Tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let options = self.options.read().clone();
        let url = options.endpoint().map_err(|e| {
            error!(error = %e, "Cannot connect");
            e
        })?;
        let runtime = Handle::try_current().map_err(|e| BeaconError::Runtime(e.to_string()))?;

        let transport = {
            let mut slot = self.context.write();
            match slot.as_ref() {
                Some(context) => Arc::clone(&context.transport),
                None => {
                    let context = self.build_context(&options, &url, runtime.clone())?;
                    let transport = Arc::clone(&context.transport);
                    *slot = Some(context);
                    transport
                }
            }
        };

        if transport.state() != ConnectionState::Disconnected {
            debug!(state = %transport.state(), "Connect ignored");
            return Ok(());
        }

        info!(url = %url, transport = transport.name(), "Connecting");
        let timeout = options.connect_timeout();
        runtime.spawn(async move {
            if let Err(e) = transport.connect(timeout).await {
                warn!(error = %e, "Connection failed");
            }
        });
        Ok(())
    }

    fn build_context(
        &self,
        options: &Options,
        url: &reqwest::Url,
        runtime: Handle,
    ) -> Result<ChannelContext> {
        let authorizer = match &self.authorizer {
            Some(authorizer) => Arc::clone(authorizer),
            None => {
                let endpoint = options.auth_url()?;
                let http = HttpAuthorizer::new(endpoint, &options.auth.headers)
                    .map_err(|e| BeaconError::Config(e.to_string()))?;
                Arc::new(http) as Arc<dyn Authorizer>
            }
        };

        Ok(ChannelContext {
            transport: (self.factory)(options.transport_config(url)),
            authorizer,
            formatter: options.formatter(),
            runtime,
        })
    }

    fn context(&self) -> Result<ChannelContext> {
        self.context.read().clone().ok_or(BeaconError::NotConnected)
    }

    /// The transport, once `connect` has created it.
    #[must_use]
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.context
            .read()
            .as_ref()
            .map(|context| Arc::clone(&context.transport))
    }

    /// Listen for a raw event on the connection, regardless of channel.
    ///
    /// # Errors
    ///
    /// [`BeaconError::NotConnected`] before `connect`.
    pub fn on<F>(&self, event: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        let transport = self.transport().ok_or(BeaconError::NotConnected)?;
        Ok(transport.on(event, Arc::new(callback)))
    }

    /// Listen for a connection lifecycle event.
    ///
    /// # Errors
    ///
    /// [`BeaconError::NotConnected`] before `connect`.
    pub fn on_client_event<F>(&self, event: ClientEvent, callback: F) -> Result<ListenerId>
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let transport = self.transport().ok_or(BeaconError::NotConnected)?;
        Ok(transport.on_client_event(event, Arc::new(callback)))
    }

    /// Remove a listener added with `on` or `on_client_event`.
    pub fn off(&self, listener: ListenerId) -> bool {
        self.transport()
            .map(|transport| transport.off(listener))
            .unwrap_or(false)
    }

    /// Listen for `event` on the public channel `name`.
    ///
    /// # Errors
    ///
    /// See [`Connector::channel`].
    pub fn listen<F>(&self, name: &str, event: &str, callback: F) -> Result<Channel>
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        let channel = self.channel(name)?;
        channel.listen(event, callback);
        Ok(channel)
    }

    /// Get or create the public channel `name`.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InvalidChannel`] for a bad name,
    /// [`BeaconError::NotConnected`] before `connect`.
    pub fn channel(&self, name: &str) -> Result<Channel> {
        Ok(self.join(ChannelKind::Public, name)?.channel().clone())
    }

    /// Get or create the private channel `private-{name}`.
    ///
    /// # Errors
    ///
    /// See [`Connector::channel`].
    pub fn private_channel(&self, name: &str) -> Result<Channel> {
        Ok(self.join(ChannelKind::Private, name)?.channel().clone())
    }

    /// Get or create the presence channel `presence-{name}`.
    ///
    /// # Errors
    ///
    /// See [`Connector::channel`].
    pub fn presence_channel(&self, name: &str) -> Result<PresenceChannel> {
        self.join(ChannelKind::Presence, name)?
            .as_presence()
            .cloned()
            .ok_or(BeaconError::InvalidChannel("not a presence channel"))
    }

    fn join(&self, kind: ChannelKind, name: &str) -> Result<RegisteredChannel> {
        validate_channel_name(name).map_err(BeaconError::InvalidChannel)?;
        let context = self.context()?;
        let key = kind.decorate(name);

        let (entry, created) = self.registry.get_or_create(&key, || {
            let channel = Channel::new(key.clone(), kind, context);
            match kind {
                ChannelKind::Public => RegisteredChannel::Public(channel),
                ChannelKind::Private => RegisteredChannel::Private(channel),
                ChannelKind::Presence => RegisteredChannel::Presence(PresenceChannel::new(channel)),
            }
        });
        if created {
            entry.channel().start();
        }
        Ok(entry)
    }

    /// Leave `name`, `private-{name}` and `presence-{name}`.
    ///
    /// Returns the number of channels left. Unknown names are a no-op.
    pub fn leave(&self, name: &str) -> usize {
        self.registry.leave(name)
    }

    /// Leave exactly one channel by its full name.
    pub fn leave_channel(&self, key: &str) -> bool {
        self.registry.leave_channel(key)
    }

    /// The session id, or an empty string when there is no session.
    #[must_use]
    pub fn socket_id(&self) -> String {
        self.transport()
            .and_then(|transport| transport.session_id())
            .unwrap_or_default()
    }

    /// Close the connection. Channels stay registered and resubscribe on the
    /// next connect.
    pub fn disconnect(&self) {
        match self.transport() {
            Some(transport) => {
                info!("Disconnecting");
                transport.disconnect();
            }
            None => debug!("Disconnect without a transport"),
        }
    }

    /// Replace the options.
    ///
    /// Every channel is unsubscribed and dropped and the transport is closed
    /// and discarded. If that transport was connected or connecting, a new one
    /// is built from the new options and connected.
    ///
    /// # Errors
    ///
    /// Returns the error of the reconnect, if one was attempted.
    pub fn set_options(&self, options: Options) -> Result<()> {
        for channel in self.registry.drain() {
            if let Err(e) = channel.channel().unsubscribe() {
                warn!(channel = %channel.name(), error = %e, "Unsubscribe failed");
            }
        }
        let previous = self.context.write().take();
        let was_live = previous.map_or(false, |context| {
            let live = context.transport.state() != ConnectionState::Disconnected;
            context.transport.disconnect();
            live
        });
        *self.options.write() = options;
        info!(reconnect = was_live, "Options replaced");

        if was_live {
            self.connect()
        } else {
            Ok(())
        }
    }

    #[must_use]
    pub fn options(&self) -> Options {
        self.options.read().clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.transport()
            .map(|transport| transport.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("host", &self.options.read().host)
            .field("state", &self.state())
            .field("channels", &self.registry.len())
            .finish()
    }
}
