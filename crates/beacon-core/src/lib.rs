//! # beacon-core
//!
//! Client facade for broadcasting servers: one [`Connector`] per connection,
//! channels obtained from it by name, and presence channels that track who
//! else is subscribed.
//!
//! ## Concepts
//!
//! - **Connector**: owns the transport and the channel registry
//! - **Channel**: a subscription with its own event listeners
//! - **Private / presence channels**: authorized through the auth endpoint
//!   before subscribing; presence channels also track members
//! - **Event names**: relative to a namespace (`App.Events` by default)
//!   unless prefixed with `.`
//!
//! ## Example
//!
//! ```rust,ignore
//! use beacon_core::{Connector, Options};
//!
//! let connector = Connector::new(Options::new("wss://ws.example.com"));
//! connector.connect()?;
//!
//! connector
//!     .private_channel("orders.1")?
//!     .listen("OrderShipped", |event| println!("{}", event.data));
//!
//! let room = connector.presence_channel("chat")?;
//! room.here(|members| println!("{} online", members.len()))
//!     .joining(|member| println!("{} joined", member.id));
//! ```

pub mod auth;
pub mod channel;
pub mod connector;
pub mod error;
pub mod formatter;
pub mod options;
pub mod presence;
pub mod registry;

pub use auth::{AuthError, Authorizer, HttpAuthorizer};
pub use channel::{
    validate_channel_name, Channel, ChannelKind, ErrorCallback, SubscriptionState,
    MAX_CHANNEL_NAME_LENGTH,
};
pub use connector::{Connector, TransportFactory};
pub use error::{BeaconError, Result};
pub use formatter::EventFormatter;
pub use options::{AuthOptions, Options, TransportOptions};
pub use presence::{MemberCallback, Members, MembersCallback, PresenceChannel, WeakPresenceChannel};
pub use registry::{ChannelRegistry, RegisteredChannel};

pub use beacon_protocol::{Credential, Member};
pub use beacon_transport::{ClientEvent, ConnectionState, LifecycleEvent, ListenerId, RawEvent};
