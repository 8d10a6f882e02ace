//! # beacon-transport
//!
//! The Transport Handle consumed by `beacon-core`: one logical connection to a
//! broadcasting server, a raw event stream, and connection lifecycle events.
//!
//! - **`Transport`** - the handle contract every transport implements
//! - **`Dispatcher`** - ordered callback tables for raw and lifecycle events
//! - **WebSocket** - the default transport, built on tokio-tungstenite
//! - **Mock** - an in-memory transport for tests (feature `testing`)
//!
//! ```rust,ignore
//! use beacon_transport::{Transport, TransportConfig, WebSocketTransport};
//! use std::time::Duration;
//!
//! let transport = WebSocketTransport::new(TransportConfig::new("ws://localhost:6001"));
//! transport.on("App\\Events\\OrderShipped", std::sync::Arc::new(|event| {
//!     println!("{:?}", event.data);
//! }));
//! transport.connect(Duration::from_secs(5)).await?;
//! ```

pub mod dispatch;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use dispatch::{Dispatcher, EventCallback, LifecycleCallback, ListenerId};
pub use traits::{
    ClientEvent, ConnectionState, LifecycleEvent, RawEvent, Transport, TransportConfig,
    TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockTransport, TransportCall};
