mod connection;
mod framing;

pub use connection::{Connection, ConnectionError};
pub use framing::{Frame, VelocystreamCodec, WireVersion};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::lock::Mutex as AsyncMutex;
use nebula_core::{Endpoint, Headers, RawResponse, Request, Scheme};
use serde::{Deserialize, Serialize};

use crate::{Transport, TransportError};

/// One of these, keyed by endpoint address, lazily dials and then caches a
/// multiplexed [`Connection`]. Mirrors the dial-once/reuse-after pattern:
/// concurrent callers targeting the same endpoint race for the async-aware
/// lock, and only the first one actually dials.
type DialState = Arc<AsyncMutex<Option<Arc<Connection>>>>;

#[derive(Serialize, Deserialize)]
struct WireRequestHeader {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
}

#[derive(Serialize, Deserialize)]
struct WireResponseHeader {
    status: u16,
    headers: Vec<(String, String)>,
}

/// The legacy multiplexed binary-framed transport. One connection per
/// endpoint, shared across requests; unsupported for `tls`-scheme
/// endpoints (see `DESIGN.md`).
pub struct BinaryTransport {
    version: WireVersion,
    connections: Mutex<HashMap<String, DialState>>,
}

impl BinaryTransport {
    pub fn new(version: WireVersion) -> Self {
        Self {
            version,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn state_for(&self, address: &str) -> DialState {
        self.connections
            .lock()
            .expect("connection table lock poisoned")
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    async fn connection_for(&self, endpoint: &Endpoint) -> Result<Arc<Connection>, TransportError> {
        if endpoint.scheme() == Scheme::Tls {
            return Err(TransportError::Protocol {
                endpoint: endpoint.as_str().to_string(),
                reason: "the legacy binary transport does not support tls endpoints".into(),
            });
        }

        let address = host_port(endpoint)?;
        let state = self.state_for(&address);
        let mut guard = state.lock().await;

        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = Arc::new(Connection::dial(&address, self.version).await.map_err(|err| {
            TransportError::Connect {
                endpoint: endpoint.as_str().to_string(),
                source: Box::new(err),
            }
        })?);
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

fn host_port(endpoint: &Endpoint) -> Result<String, TransportError> {
    let url = endpoint.url();
    let host = url.host_str().ok_or_else(|| TransportError::Protocol {
        endpoint: endpoint.as_str().to_string(),
        reason: "endpoint has no host".into(),
    })?;
    let port = url.port_or_known_default().unwrap_or(8529);
    Ok(format!("{host}:{port}"))
}

#[async_trait]
impl Transport for BinaryTransport {
    #[tracing::instrument(skip(self, request), fields(endpoint = %endpoint, method = request.method().as_str(), path = request.path()))]
    async fn execute(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> Result<RawResponse, TransportError> {
        let conn = self.connection_for(endpoint).await?;

        let wire_header = WireRequestHeader {
            method: request.method().as_str().to_string(),
            path: request.path().to_string(),
            query: request.query().to_vec(),
            headers: request.headers().to_vec(),
        };
        let header_bytes = Bytes::from(
            serde_json::to_vec(&wire_header).expect("request header always encodes"),
        );
        let payload_bytes = match request.body() {
            Some(body) => {
                Bytes::from(serde_json::to_vec(body).map_err(|err| TransportError::Protocol {
                    endpoint: endpoint.as_str().to_string(),
                    reason: format!("request body is not encodable: {err}"),
                })?)
            }
            None => Bytes::new(),
        };

        let frame = conn
            .call(header_bytes, payload_bytes)
            .await
            .map_err(|err| TransportError::Connect {
                endpoint: endpoint.as_str().to_string(),
                source: Box::new(err),
            })?;

        let wire_response: WireResponseHeader = serde_json::from_slice(&frame.header)
            .map_err(|err| TransportError::Protocol {
                endpoint: endpoint.as_str().to_string(),
                reason: format!("malformed response header: {err}"),
            })?;

        let mut headers = Headers::new();
        for (name, value) in wire_response.headers {
            headers.insert(name, value);
        }

        let body = if frame.payload.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&frame.payload).map_err(|err| TransportError::Protocol {
                endpoint: endpoint.as_str().to_string(),
                reason: format!("response payload is not valid JSON: {err}"),
            })?
        };

        Ok(RawResponse {
            status: wire_response.status,
            headers,
            body,
            raw: Some(frame.payload),
            endpoint: endpoint.clone(),
        })
    }
}
