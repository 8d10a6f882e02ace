//! Error type for connector and channel operations.

use beacon_transport::TransportError;
use thiserror::Error;

use crate::auth::AuthError;

/// Errors returned by the connector and channels.
#[derive(Debug, Error)]
pub enum BeaconError {
    /// Missing or malformed configuration; nothing was attempted.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation needs a transport and there is none, or no live session.
    #[error("Not connected")]
    NotConnected,

    /// A private or presence subscription could not be authorized.
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    /// Invalid channel name or an operation the channel kind does not allow.
    #[error("Invalid channel: {0}")]
    InvalidChannel(&'static str),

    /// Called outside a Tokio runtime.
    #[error("No async runtime: {0}")]
    Runtime(String),

    /// Transport failure other than a missing session.
    #[error("Transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for BeaconError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotConnected => BeaconError::NotConnected,
            other => BeaconError::Transport(other),
        }
    }
}

/// Result alias for beacon-core operations.
pub type Result<T> = std::result::Result<T, BeaconError>;
