use std::time::Duration;

use async_trait::async_trait;
use nebula_core::{Endpoint, Headers, Method, RawResponse, Request};

use crate::{Transport, TransportError};

/// A pooled HTTP/1.1 transport. One `reqwest::Client` is shared across every
/// endpoint the connection talks to; `reqwest` pools keep-alive connections
/// per origin internally, so this does not need its own per-endpoint pool.
pub struct HttpTransport {
    client: reqwest::Client,
}

#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
    /// When true, 3xx responses are returned to the caller (so the
    /// active-failover wrapper can inspect `Location`) instead of being
    /// followed automatically.
    pub suppress_redirects: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
            user_agent: concat!("nebula-client/", env!("CARGO_PKG_VERSION")).to_string(),
            suppress_redirects: true,
        }
    }
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent);

        if config.suppress_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Self {
            client: builder.build().expect("reqwest client configuration is valid"),
        }
    }

    /// Construct from a caller-supplied client, e.g. to share a connection
    /// pool across several [`HttpTransport`]s or to inject test doubles
    /// built from `reqwest::Client::builder()`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip(self, request), fields(endpoint = %endpoint, method = request.method().as_str(), path = request.path()))]
    async fn execute(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> Result<RawResponse, TransportError> {
        let url = build_url(endpoint, request);
        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let started = std::time::Instant::now();
        let response = builder.send().await.map_err(|err| classify(endpoint, err))?;
        let elapsed = started.elapsed();

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let raw_bytes = response
            .bytes()
            .await
            .map_err(|err| classify(endpoint, err))?;

        let body = if raw_bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&raw_bytes).map_err(|err| TransportError::Protocol {
                endpoint: endpoint.as_str().to_string(),
                reason: format!("response body is not valid JSON: {err}"),
            })?
        };

        tracing::debug!(status, elapsed_ms = elapsed.as_millis() as u64, "request completed");

        Ok(RawResponse {
            status,
            headers,
            body,
            raw: Some(raw_bytes),
            endpoint: endpoint.clone(),
        })
    }
}

fn build_url(endpoint: &Endpoint, request: &Request) -> reqwest::Url {
    let mut url = endpoint
        .url()
        .join(request.path().trim_start_matches('/'))
        .expect("path segments were already percent-encoded at request-build time");
    if !request.query().is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in request.query() {
            pairs.append_pair(k, v);
        }
    }
    url
}

fn classify(endpoint: &Endpoint, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            endpoint: endpoint.as_str().to_string(),
        }
    } else if err.is_connect() {
        TransportError::Connect {
            endpoint: endpoint.as_str().to_string(),
            source: Box::new(err),
        }
    } else {
        TransportError::Connect {
            endpoint: endpoint.as_str().to_string(),
            source: Box::new(err),
        }
    }
}
