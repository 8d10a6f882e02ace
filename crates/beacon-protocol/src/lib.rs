//! # beacon-protocol
//!
//! Wire protocol spoken between a Beacon client and a broadcasting server.
//!
//! The client opens a connection, sends `Connect`, and receives `Connected`
//! carrying the session (socket) id. After that it issues `Subscribe` /
//! `Unsubscribe` requests and receives `Event` and `Presence` frames scoped
//! to the channels it subscribed to.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - Session handshake
//! - `Subscribe` / `Unsubscribe` - Channel membership, optionally authorized
//! - `Event` / `Whisper` - Server broadcasts and client-to-client events
//! - `Presence` - Member lists, joins, leaves and updates
//! - `Error`, `Ping`, `Pong`
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Frame};
//!
//! let frame = Frame::subscribe("orders", None);
//!
//! let text = codec::encode_json(&frame).unwrap();
//! assert_eq!(codec::decode_json(&text).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Credential, Frame, Member, PresenceAction, CLIENT_EVENT_PREFIX};

/// Protocol version sent in `Connect` and expected back in `Connected`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Whether a server speaking `version` can serve this client.
///
/// Only an exact major match is accepted; the protocol has no minor
/// revisions yet.
#[must_use]
pub fn is_compatible(version: u8) -> bool {
    version == PROTOCOL_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible(PROTOCOL_VERSION));
        assert!(!is_compatible(PROTOCOL_VERSION + 1));
        assert!(!is_compatible(0));
    }
}
