//! Polling, listing, cancelling, and deleting asynchronous jobs by opaque
//! id. Job *submission* is just dispatching an ordinary request with
//! `RequestContext::with_async(true)`: the dispatcher (`nebula-dispatch`)
//! already turns the resulting HTTP 202 into `ClusterError::AsyncJobInProgress(id)`,
//! which carries the id this crate's methods then operate on.

use std::sync::Arc;

use nebula_core::{ClusterError, Method, Request};
use nebula_dispatch::Dispatcher;

/// Which bucket of jobs to enumerate with [`list`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Done,
}

impl JobStatus {
    fn segment(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
        }
    }
}

/// Which jobs [`delete`] should remove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteScope {
    /// A single job by id.
    Single(String),
    /// Every stored job result.
    All,
    /// Only jobs that have already expired (past their result retention
    /// window), optionally bounded to those that expired before a given
    /// unix timestamp.
    Expired { before_unix_seconds: Option<i64> },
}

/// Re-polls `job_id` via `PUT /_api/job/{id}`. A still-pending job re-raises
/// the same [`ClusterError::AsyncJobInProgress`] error it did on
/// submission; a finished job decodes its deferred response body.
#[tracing::instrument(skip(dispatcher))]
pub async fn poll(dispatcher: &Dispatcher, job_id: &str) -> Result<serde_json::Value, ClusterError> {
    let request = Request::builder(Method::Put)
        .segment("_api")
        .segment("job")
        .segment(job_id)
        .build();

    let response = dispatcher.execute(request).await?;
    match response.status {
        204 => Err(ClusterError::AsyncJobInProgress(job_id.to_string())),
        200 => Ok(response.body),
        _ => ClusterError::from_response("PUT", "/_api/job", &response)
            .map(Err)
            .unwrap_or(Ok(response.body)),
    }
}

/// Lists the ids of jobs currently in `status`.
pub async fn list(dispatcher: &Dispatcher, status: JobStatus) -> Result<Vec<String>, ClusterError> {
    let request = Request::builder(Method::Get)
        .segment("_api")
        .segment("job")
        .segment(status.segment())
        .build();

    let response = dispatcher.execute(request).await?;
    serde_json::from_value(response.body)
        .map_err(|err| ClusterError::Protocol(format!("job list did not decode: {err}")))
}

/// Cancels a still-running job. Idempotent: cancelling an already-finished
/// or already-cancelled job is not an error.
pub async fn cancel(dispatcher: &Dispatcher, job_id: &str) -> Result<(), ClusterError> {
    let request = Request::builder(Method::Put)
        .segment("_api")
        .segment("job")
        .segment(job_id)
        .segment("cancel")
        .build();

    dispatcher.execute(request).await?;
    Ok(())
}

/// Removes stored job results per `scope`.
pub async fn delete(dispatcher: &Dispatcher, scope: DeleteScope) -> Result<(), ClusterError> {
    let mut builder = Request::builder(Method::Delete).segment("_api").segment("job");
    builder = match &scope {
        DeleteScope::Single(id) => builder.segment(id),
        DeleteScope::All => builder.segment("all"),
        DeleteScope::Expired { .. } => builder.segment("expired"),
    };
    if let DeleteScope::Expired {
        before_unix_seconds: Some(stamp),
    } = &scope
    {
        builder = builder.query("stamp", stamp.to_string());
    }

    dispatcher.execute(builder.build()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use nebula_core::{Endpoint, EndpointSet, Headers, RawResponse};
    use nebula_dispatch::{EndpointSelector, SelectionPolicy};
    use nebula_transport::auth::{AuthProvider, Credentials};
    use nebula_transport::{Transport, TransportError};

    use super::*;

    struct ScriptedTransport {
        status: u16,
        body: serde_json::Value,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(
            &self,
            endpoint: &Endpoint,
            _request: &Request,
        ) -> Result<RawResponse, TransportError> {
            Ok(RawResponse {
                status: self.status,
                headers: Headers::new(),
                body: self.body.clone(),
                raw: None,
                endpoint: endpoint.clone(),
            })
        }
    }

    fn dispatcher(status: u16, body: serde_json::Value) -> Dispatcher {
        let endpoints =
            Arc::new(EndpointSet::new(vec![Endpoint::parse("http://a:8529").unwrap()]).unwrap());
        let auth = Arc::new(AuthProvider::new(reqwest::Client::new(), Credentials::None));
        Dispatcher::new(
            endpoints,
            Arc::new(ScriptedTransport { status, body }),
            auth,
            EndpointSelector::new(SelectionPolicy::Single),
        )
    }

    #[tokio::test]
    async fn poll_pending_job_reraises_in_progress() {
        let dispatch = dispatcher(204, serde_json::Value::Null);
        let err = poll(&dispatch, "42").await.unwrap_err();
        assert!(matches!(err, ClusterError::AsyncJobInProgress(id) if id == "42"));
    }

    #[tokio::test]
    async fn poll_finished_job_decodes_body() {
        let dispatch = dispatcher(200, serde_json::json!({"ok": true}));
        let body = poll(&dispatch, "42").await.unwrap();
        assert_eq!(body, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn list_decodes_id_array() {
        let dispatch = dispatcher(200, serde_json::json!(["1", "2"]));
        let ids = list(&dispatch, JobStatus::Done).await.unwrap();
        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
    }
}
