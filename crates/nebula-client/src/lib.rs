//! Ties endpoint selection, transport, dispatch/retry, and the collaborator
//! crates (cursors, async jobs, agency, transfers) into a single facade:
//! build a [`Connection`] once per application and share it across callers.

mod builder;
mod diagnostics;

pub use builder::ConnectionBuilder;
pub use diagnostics::Diagnostics;

pub use nebula_agency::{AgencyClient, AgencyKey, DistributedLock};
pub use nebula_core::{ClusterError, Endpoint, RawResponse, Request, RequestContext};
pub use nebula_dispatch::{Dispatcher, SelectionPolicy};
pub use nebula_cursor::Cursor;
pub use nebula_jobs::{DeleteScope, JobStatus};
pub use nebula_transfer::{DbServerStatus, TransferDirection, TransferHandle, TransferProgress};
pub use nebula_transport::auth::Credentials;

use std::sync::Arc;
use std::time::Duration;

use nebula_transport::auth::{AuthError, AuthProvider};
use serde::de::DeserializeOwned;

/// A logical connection to the cluster: one [`Dispatcher`] for ordinary
/// requests, one (possibly distinct) dispatcher pointed at the agency, and
/// the auth state and diagnostics both share.
///
/// Cheap to clone: every field is an `Arc`. Build once with
/// [`Connection::builder`] and hand clones to however many callers need it.
#[derive(Clone)]
pub struct Connection {
    dispatcher: Arc<Dispatcher>,
    agency: Arc<AgencyClient>,
    auth: Arc<AuthProvider>,
    diagnostics: Arc<Diagnostics>,
}

impl Connection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        agency_dispatcher: Arc<Dispatcher>,
        auth: Arc<AuthProvider>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            dispatcher,
            agency: Arc::new(AgencyClient::new(agency_dispatcher)),
            auth,
            diagnostics,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Escape hatch for the domain wrappers this core doesn't implement
    /// (databases, collections, documents, ...): they build their own
    /// [`Request`]s and dispatch them through the connection directly.
    pub async fn execute(&self, request: Request) -> Result<RawResponse, ClusterError> {
        self.dispatcher.execute(request).await
    }

    /// Idempotent credential rotation; unchanged credentials surface
    /// [`ClusterError::AuthenticationNotChanged`] rather than silently
    /// retrying with the same value.
    pub fn set_authentication(&self, credentials: Credentials) -> Result<(), ClusterError> {
        self.auth.set_credentials(credentials).map_err(|err| match err {
            AuthError::NotChanged => ClusterError::AuthenticationNotChanged,
            other => ClusterError::Network(Box::new(other)),
        })
    }

    /// Runs a query against `database` and returns a resumable cursor over
    /// its results. `body` is the full `POST /_api/cursor` payload (query
    /// string, bind vars, and batch-creation options); per-call options
    /// like `allowRetry` or `batchSize` belong on `ctx`.
    pub async fn cursor<T>(
        &self,
        database: impl AsRef<str>,
        body: serde_json::Value,
        ctx: RequestContext,
    ) -> Result<Cursor<T>, ClusterError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        Cursor::create(self.dispatcher.clone(), database, body, ctx).await
    }

    pub async fn poll_job(&self, job_id: &str) -> Result<serde_json::Value, ClusterError> {
        nebula_jobs::poll(&self.dispatcher, job_id).await
    }

    pub async fn list_jobs(&self, status: JobStatus) -> Result<Vec<String>, ClusterError> {
        nebula_jobs::list(&self.dispatcher, status).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<(), ClusterError> {
        nebula_jobs::cancel(&self.dispatcher, job_id).await
    }

    pub async fn delete_jobs(&self, scope: DeleteScope) -> Result<(), ClusterError> {
        nebula_jobs::delete(&self.dispatcher, scope).await
    }

    pub fn agency(&self) -> &Arc<AgencyClient> {
        &self.agency
    }

    /// Builds a [`DistributedLock`] over the agency at `path`. `owner_token`
    /// must uniquely identify this holder; see [`DistributedLock::new`].
    pub fn lock(&self, path: AgencyKey, owner_token: impl Into<String>, lease: Duration) -> DistributedLock {
        DistributedLock::new(self.agency.clone(), path, owner_token, lease)
    }

    pub async fn submit_transfer(
        &self,
        direction: TransferDirection,
        backup_id: &str,
        remote_repository: &str,
        config: serde_json::Value,
    ) -> Result<TransferHandle, ClusterError> {
        nebula_transfer::submit(&self.dispatcher, direction, backup_id, remote_repository, config).await
    }

    pub async fn transfer_progress(&self, handle: &TransferHandle) -> Result<TransferProgress, ClusterError> {
        nebula_transfer::progress(&self.dispatcher, handle).await
    }

    pub async fn abort_transfer(&self, handle: &TransferHandle) -> Result<(), ClusterError> {
        nebula_transfer::abort(&self.dispatcher, handle).await
    }

    /// Whether the target server exposes the backup admin API at all.
    /// Probed once and cached; see [`Diagnostics`].
    pub async fn backup_api_available(&self) -> bool {
        self.diagnostics.backup_api_available(&self.dispatcher).await
    }
}
