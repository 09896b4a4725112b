//! Per-endpoint request execution: one pooled HTTP/1.1 transport and one
//! legacy binary-framed transport, plus the auth provider that both share.

pub mod auth;
pub mod binary;
pub mod http;

use async_trait::async_trait;
use nebula_core::{Endpoint, RawResponse, Request};

/// A transport-level (as opposed to server-application-level) failure:
/// connection refused, DNS failure, TLS handshake failure, decode failure
/// of a malformed frame, and so on. Server responses -- even 4xx/5xx ones
/// with a structured error body -- are *not* `TransportError`s; they
/// decode successfully into a [`RawResponse`] and are classified by the
/// dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to reach {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("request to {endpoint} was cancelled")]
    Cancelled { endpoint: String },

    #[error("malformed response from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    #[error(transparent)]
    Auth(#[from] auth::AuthError),
}

/// Executes a single [`Request`] against a specific [`Endpoint`].
///
/// Implementations MUST preserve: request correlation (for logging), total
/// wall time, the network-vs-application error classification above, and
/// raw captured bytes when the caller's context requested them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> Result<RawResponse, TransportError>;
}
