use std::sync::Arc;
use std::time::Instant;

use nebula_core::{CancellationToken, ClusterError, Endpoint, EndpointSet, RawResponse, Request};
use nebula_transport::auth::{AuthError, AuthProvider};
use nebula_transport::{Transport, TransportError};

use crate::policy::EndpointSelector;
use crate::retry::{FailoverBackoff, DEFAULT_BUDGET};

/// Ties endpoint selection, auth materialization, and the retry/failover
/// wrapper stack into a single entry point. A domain wrapper builds a
/// [`Request`] (with any per-call options already folded into its
/// [`nebula_core::RequestContext`]) and calls [`Dispatcher::execute`].
pub struct Dispatcher {
    endpoints: Arc<EndpointSet>,
    transport: Arc<dyn Transport>,
    auth: Arc<AuthProvider>,
    selector: EndpointSelector,
}

impl Dispatcher {
    pub fn new(
        endpoints: Arc<EndpointSet>,
        transport: Arc<dyn Transport>,
        auth: Arc<AuthProvider>,
        selector: EndpointSelector,
    ) -> Self {
        Self {
            endpoints,
            transport,
            auth,
            selector,
        }
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    #[tracing::instrument(skip(self, request), fields(method = request.method().as_str(), path = request.path()))]
    pub async fn execute(&self, mut request: Request) -> Result<RawResponse, ClusterError> {
        request.context().validate()?;

        let ctx = request.context().clone();
        let budget = ctx.queue_timeout().unwrap_or(DEFAULT_BUDGET);
        let deadline = Instant::now() + budget;
        let mut backoff = FailoverBackoff::with_budget(budget);

        if let Some(timeout) = ctx.queue_timeout() {
            request = request.with_header(
                "x-arango-queue-time-seconds",
                format!("{:.3}", timeout.as_secs_f64()),
            );
        }
        if ctx.is_async() == Some(true) {
            request = request.with_header("x-arango-async", "store");
        }

        let pinned = ctx
            .endpoint_pin()
            .and_then(|raw| Endpoint::parse(&raw).ok());

        loop {
            let endpoint = match pinned.clone().or_else(|| self.selector.select(&self.endpoints)) {
                Some(endpoint) => endpoint,
                None => return Err(ClusterError::Internal("no endpoints available".into())),
            };

            let attempt = self.authorize(&endpoint, request.clone()).await?;

            let outcome = self
                .execute_once(&endpoint, &attempt, deadline, ctx.cancellation())
                .await;
            match outcome {
                Ok(response) => {
                    if let Some(location) = redirect_location(&response) {
                        if let Ok(next) = Endpoint::parse(&location) {
                            tracing::debug!(%location, "following leader redirect");
                            self.endpoints.pin(next);
                            continue;
                        }
                    }

                    if ctx.is_async() == Some(true) && response.status == 202 {
                        let job_id = response
                            .headers
                            .get("x-arango-async-id")
                            .map(str::to_string)
                            .unwrap_or_default();
                        return Err(ClusterError::AsyncJobInProgress(job_id));
                    }

                    match ClusterError::from_response(request.method().as_str(), request.path(), &response) {
                        None => return Ok(response),
                        Some(err) => {
                            if retryable(&err) && Instant::now() < deadline {
                                self.selector.rotate_away_from(&self.endpoints, &endpoint);
                                if let Some(delay) = backoff.next_delay() {
                                    tracing::debug!(error = %err, delay_ms = delay.as_millis() as u64, "retrying after server error");
                                    tokio::time::sleep(delay).await;
                                    continue;
                                }
                            }
                            return Err(err);
                        }
                    }
                }
                Err(err) => {
                    if matches!(err, TransportError::Cancelled { .. }) {
                        return Err(classify_transport_error(err));
                    }
                    let retry_eligible = Instant::now() < deadline;
                    if retry_eligible {
                        self.selector.rotate_away_from(&self.endpoints, &endpoint);
                        if let Some(delay) = backoff.next_delay() {
                            tracing::debug!(error = %err, delay_ms = delay.as_millis() as u64, "retrying after transport error");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    return Err(classify_transport_error(err));
                }
            }
        }
    }

    /// Runs one in-flight transport call, racing it against the overall
    /// `deadline` and, if the caller's context carries one, a cancellation
    /// token. Either trip abandons the in-flight call promptly rather than
    /// waiting for the transport to notice on its own.
    async fn execute_once(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        deadline: Instant,
        cancellation: Option<CancellationToken>,
    ) -> Result<RawResponse, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let call = self.transport.execute(endpoint, request);

        let timed = async {
            tokio::time::timeout(remaining, call)
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::Timeout {
                        endpoint: endpoint.as_str().to_string(),
                    })
                })
        };

        match cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(TransportError::Cancelled {
                        endpoint: endpoint.as_str().to_string(),
                    }),
                    outcome = timed => outcome,
                }
            }
            None => timed.await,
        }
    }

    async fn authorize(&self, endpoint: &Endpoint, request: Request) -> Result<Request, ClusterError> {
        match self.auth.authorization_header(endpoint.url()).await {
            Ok(Some(header)) => Ok(request.with_header("authorization", header)),
            Ok(None) => Ok(request),
            Err(err) => Err(classify_auth_error(err)),
        }
    }
}

/// Whether `err` is worth rotating endpoints and retrying rather than
/// surfacing immediately. Deliberately narrow: client errors (400s other
/// than 412, conflicts, not-found) are not retried since a different
/// endpoint would answer identically.
fn retryable(err: &ClusterError) -> bool {
    err.is_service_unavailable() || err.is_no_leader_or_ongoing()
}

fn redirect_location(response: &RawResponse) -> Option<String> {
    if (300..400).contains(&response.status) {
        response.headers.get("location").map(str::to_string)
    } else {
        None
    }
}

fn classify_transport_error(err: TransportError) -> ClusterError {
    match err {
        TransportError::Timeout { .. } => ClusterError::Timeout,
        TransportError::Cancelled { .. } => ClusterError::Cancelled,
        TransportError::Protocol { reason, .. } => ClusterError::Protocol(reason),
        TransportError::Auth(auth_err) => classify_auth_error(auth_err),
        TransportError::Connect { .. } => ClusterError::Network(Box::new(err)),
    }
}

fn classify_auth_error(err: AuthError) -> ClusterError {
    match err {
        AuthError::NotChanged => ClusterError::AuthenticationNotChanged,
        AuthError::ExchangeRejected { status: 401, .. } => ClusterError::Unauthorized {
            method: "POST".into(),
            path: "/_open/auth".into(),
        },
        other => ClusterError::Network(Box::new(other)),
    }
}
