//! Channel authorization.
//!
//! Private and presence subscriptions carry a credential obtained from the
//! application's auth endpoint. The request is a JSON `POST` of the session
//! id and channel name; the response is the credential attached to the
//! subscribe frame.

use async_trait::async_trait;
use beacon_protocol::Credential;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Authorization errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request could not be sent or the response not read.
    #[error("Auth request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("Auth endpoint rejected {channel} with status {status}")]
    Rejected { channel: String, status: u16 },

    /// The endpoint answered with something other than a credential.
    #[error("Invalid auth response: {0}")]
    InvalidResponse(String),

    /// A configured header name or value is not valid HTTP.
    #[error("Invalid auth header: {0}")]
    InvalidHeader(String),
}

/// Obtains credentials for private and presence channels.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authorize `socket_id` to subscribe to `channel` (the full, prefixed name).
    async fn authorize(&self, channel: &str, socket_id: &str) -> Result<Credential, AuthError>;
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    socket_id: &'a str,
    channel_name: &'a str,
}

/// Authorizer backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    client: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
}

impl HttpAuthorizer {
    /// Create an authorizer posting to `endpoint` with extra `headers`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidHeader`] if a header cannot be sent.
    pub fn new(endpoint: Url, headers: &BTreeMap<String, String>) -> Result<Self, AuthError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AuthError::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AuthError::InvalidHeader(format!("{name}: {e}")))?;
            map.insert(name, value);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            headers: map,
        })
    }

    /// The endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn authorize(&self, channel: &str, socket_id: &str) -> Result<Credential, AuthError> {
        debug!(channel, endpoint = %self.endpoint, "Authorizing channel");

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(&AuthRequest {
                socket_id,
                channel_name: channel,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                channel: channel.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}
