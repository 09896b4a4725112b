use std::sync::Arc;

use nebula_core::{ClusterError, Endpoint, EndpointSet};
use nebula_dispatch::{Dispatcher, EndpointSelector, SelectionPolicy};
use nebula_transport::auth::{AuthProvider, Credentials};
use nebula_transport::binary::{BinaryTransport, WireVersion};
use nebula_transport::http::{HttpTransport, HttpTransportConfig};
use nebula_transport::Transport;

use crate::diagnostics::Diagnostics;
use crate::Connection;

/// Which [`nebula_transport::Transport`] a [`Connection`] is built on.
#[derive(Clone, Debug)]
enum TransportKind {
    Http(HttpTransportConfig),
    Binary(WireVersion),
}

/// Builds a [`Connection`] from endpoints, credentials, and transport
/// choice. Mirrors the shape of a typical client constructor: every setter
/// takes `self` by value and returns it, so calls chain into one
/// expression ending in [`ConnectionBuilder::build`].
pub struct ConnectionBuilder {
    endpoints: Vec<String>,
    agency_endpoints: Option<Vec<String>>,
    credentials: Credentials,
    transport: TransportKind,
    selection_policy: SelectionPolicy,
}

impl ConnectionBuilder {
    pub(crate) fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            agency_endpoints: None,
            credentials: Credentials::None,
            transport: TransportKind::Http(HttpTransportConfig::default()),
            selection_policy: SelectionPolicy::RoundRobin,
        }
    }

    /// The coordinator/single-server endpoints ordinary requests dispatch
    /// against. Required; [`ConnectionBuilder::build`] rejects an empty set.
    pub fn endpoints(mut self, endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Agent endpoints the agency client and distributed lock dispatch
    /// against. Defaults to the same endpoints as [`ConnectionBuilder::endpoints`]
    /// when not set, which is correct for a single-server or active-failover
    /// deployment where every endpoint also runs the agency.
    pub fn agency_endpoints(mut self, endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.agency_endpoints = Some(endpoints.into_iter().map(Into::into).collect());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn http_transport(mut self, config: HttpTransportConfig) -> Self {
        self.transport = TransportKind::Http(config);
        self
    }

    pub fn binary_transport(mut self, version: WireVersion) -> Self {
        self.transport = TransportKind::Binary(version);
        self
    }

    pub fn selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = policy;
        self
    }

    pub fn build(self) -> Result<Connection, ClusterError> {
        if self.endpoints.is_empty() {
            return Err(ClusterError::InvalidArgument(
                "ConnectionBuilder requires at least one endpoint".into(),
            ));
        }

        let endpoint_set = Arc::new(parse_endpoint_set(&self.endpoints)?);
        let http_client = reqwest::Client::new();
        let auth = Arc::new(AuthProvider::new(http_client, self.credentials));

        let transport: Arc<dyn Transport> = match self.transport {
            TransportKind::Http(config) => Arc::new(HttpTransport::new(config)),
            TransportKind::Binary(version) => Arc::new(BinaryTransport::new(version)),
        };

        let dispatcher = Arc::new(Dispatcher::new(
            endpoint_set,
            transport.clone(),
            auth.clone(),
            EndpointSelector::new(self.selection_policy),
        ));

        let agency_dispatcher = match self.agency_endpoints {
            Some(agency_endpoints) => Arc::new(Dispatcher::new(
                Arc::new(parse_endpoint_set(&agency_endpoints)?),
                transport,
                auth.clone(),
                EndpointSelector::new(SelectionPolicy::RoundRobin),
            )),
            None => dispatcher.clone(),
        };

        Ok(Connection::new(dispatcher, agency_dispatcher, auth, Arc::new(Diagnostics::new())))
    }
}

fn parse_endpoint_set(raw: &[String]) -> Result<EndpointSet, ClusterError> {
    let endpoints: Vec<Endpoint> = raw
        .iter()
        .map(|s| Endpoint::parse(s).map_err(|err| ClusterError::InvalidArgument(format!("invalid endpoint {s:?}: {err}"))))
        .collect::<Result<_, _>>()?;
    EndpointSet::new(endpoints).map_err(|err| ClusterError::InvalidArgument(err.to_string()))
}
