//! Endpoint selection, auth materialization, and the retry/failover
//! middleware stack that sits between a domain wrapper's [`nebula_core::Request`]
//! and a [`nebula_transport::Transport`].

mod dispatcher;
mod policy;
pub mod retry;

pub use dispatcher::Dispatcher;
pub use policy::{EndpointSelector, SelectionPolicy};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use nebula_core::{
        CancellationToken, ClusterError, Endpoint, EndpointSet, Headers, Method, RawResponse, Request,
        RequestContext,
    };
    use nebula_transport::auth::{AuthProvider, Credentials};
    use nebula_transport::{Transport, TransportError};

    use super::*;

    struct ScriptedTransport {
        responses: std::sync::Mutex<Vec<Result<(u16, serde_json::Value), TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<(u16, serde_json::Value), TransportError>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(
            &self,
            endpoint: &Endpoint,
            _request: &Request,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .expect("scripted transport ran out of responses");
            next.map(|(status, body)| RawResponse {
                status,
                headers: Headers::new(),
                body,
                raw: None,
                endpoint: endpoint.clone(),
            })
        }
    }

    fn dispatcher(transport: impl Transport + 'static, policy: SelectionPolicy) -> Dispatcher {
        let endpoints =
            Arc::new(EndpointSet::new(vec![Endpoint::parse("http://a:8529").unwrap()]).unwrap());
        let auth = Arc::new(AuthProvider::new(reqwest::Client::new(), Credentials::None));
        Dispatcher::new(endpoints, Arc::new(transport), auth, EndpointSelector::new(policy))
    }

    #[tokio::test]
    async fn success_on_first_attempt_returns_immediately() {
        let transport = ScriptedTransport::new(vec![Ok((200, serde_json::json!({"ok": true})))]);
        let dispatch = dispatcher(transport, SelectionPolicy::Single);
        let request = Request::builder(Method::Get).segment("_api").segment("version").build();
        let response = dispatch.execute(request).await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok((
            404,
            serde_json::json!({"errorNum": 1202, "errorMessage": "not found"}),
        ))]);
        let dispatch = dispatcher(transport, SelectionPolicy::Single);
        let request = Request::builder(Method::Get).segment("_api").segment("document").segment("x").build();
        let err = dispatch.execute(request).await.unwrap_err();
        assert!(err.is_not_found());
    }

    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn execute(&self, _endpoint: &Endpoint, _request: &Request) -> Result<RawResponse, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("the cancellation token should trip long before this sleep elapses")
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_an_in_flight_call_promptly() {
        let dispatch = dispatcher(HangingTransport, SelectionPolicy::Single);
        let token = CancellationToken::new();
        let ctx = RequestContext::default().with_cancellation(token.clone());
        let request = Request::builder(Method::Get)
            .segment("_api")
            .segment("version")
            .context(ctx)
            .build();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), dispatch.execute(request))
            .await
            .expect("cancellation should abort the call well before the outer timeout");
        assert!(matches!(result.unwrap_err(), ClusterError::Cancelled));
    }

    #[tokio::test]
    async fn service_unavailable_is_retried_until_success() {
        let transport = ScriptedTransport::new(vec![
            Ok((503, serde_json::json!({"errorNum": 1495}))),
            Ok((200, serde_json::json!({"ok": true}))),
        ]);
        let dispatch = dispatcher(transport, SelectionPolicy::ActiveFailoverLeader);
        let request = Request::builder(Method::Get).segment("_api").segment("version").build();
        let response = dispatch.execute(request).await.unwrap();
        assert!(response.is_success());
    }
}
