//! Submission and per-dbserver progress tracking for backup transfer jobs
//! (upload to, or download from, a remote repository). Reuses the same
//! fire-and-forget-then-poll shape as the async-job manager, but the server
//! reports progress per dbserver rather than a single terminal result.

use std::collections::HashMap;

use nebula_core::{ClusterError, Method, Request};
use nebula_dispatch::Dispatcher;
use serde::Deserialize;

/// Which admin endpoint a transfer job was submitted against; `progress`
/// and `abort` must be called against the same one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    fn segment(self) -> &'static str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
        }
    }
}

/// A submitted transfer job: the id the server assigned plus which
/// direction it travels, since upload and download are distinct endpoints.
#[derive(Clone, Debug)]
pub struct TransferHandle {
    pub direction: TransferDirection,
    pub job_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DbServerState {
    Started,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl DbServerState {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            DbServerState::Completed | DbServerState::Failed | DbServerState::Cancelled
        )
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DbServerStatus {
    #[serde(rename = "Status")]
    pub state: DbServerState,
    #[serde(rename = "BytesSent", default)]
    pub bytes_done: u64,
    #[serde(rename = "Total", default)]
    pub bytes_total: u64,
}

/// A point-in-time snapshot of a transfer job's per-dbserver status map.
#[derive(Clone, Debug, Deserialize)]
pub struct TransferProgress {
    #[serde(rename = "DBServers")]
    pub dbservers: HashMap<String, DbServerStatus>,
    #[serde(rename = "Cancelled", default)]
    pub cancelled: bool,
}

impl TransferProgress {
    /// Terminal when every dbserver in the map has reached a terminal
    /// status. A job with no reported dbservers yet is never terminal.
    pub fn is_terminal(&self) -> bool {
        !self.dbservers.is_empty() && self.dbservers.values().all(|s| s.state.is_terminal())
    }

    /// True if any dbserver reported `Failed`; the overall job is failed as
    /// soon as one shard fails, even if others are still transferring.
    pub fn is_failed(&self) -> bool {
        self.dbservers.values().any(|s| s.state == DbServerState::Failed)
    }
}

/// Submits a transfer job for `backup_id` against `remote_repository`,
/// using `config` as the repository-specific connection/credential blob.
#[tracing::instrument(skip(dispatcher, config))]
pub async fn submit(
    dispatcher: &Dispatcher,
    direction: TransferDirection,
    backup_id: &str,
    remote_repository: &str,
    config: serde_json::Value,
) -> Result<TransferHandle, ClusterError> {
    let request = Request::builder(Method::Post)
        .segment("_admin")
        .segment("backup")
        .segment(direction.segment())
        .json_body(serde_json::json!({
            "id": backup_id,
            "remoteRepository": remote_repository,
            "config": config,
        }))
        .build();

    let response = dispatcher.execute(request).await?;
    let job_id = response
        .body
        .get("jobId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ClusterError::Protocol("backup transfer response carried no jobId".into()))?
        .to_string();

    Ok(TransferHandle { direction, job_id })
}

/// Polls the current per-dbserver progress of a submitted transfer job.
pub async fn progress(dispatcher: &Dispatcher, handle: &TransferHandle) -> Result<TransferProgress, ClusterError> {
    let request = Request::builder(Method::Post)
        .segment("_admin")
        .segment("backup")
        .segment(handle.direction.segment())
        .json_body(serde_json::json!({ "uploadId": handle.job_id }))
        .build();

    let response = dispatcher.execute(request).await?;
    serde_json::from_value(response.body)
        .map_err(|err| ClusterError::Protocol(format!("transfer progress did not decode: {err}")))
}

/// Aborts a still-running transfer job. The caller must keep polling
/// [`progress`] afterward until every dbserver reports `Cancelled` before
/// releasing any resources tied to the job.
pub async fn abort(dispatcher: &Dispatcher, handle: &TransferHandle) -> Result<(), ClusterError> {
    let request = Request::builder(Method::Post)
        .segment("_admin")
        .segment("backup")
        .segment(handle.direction.segment())
        .json_body(serde_json::json!({ "abort": true, "uploadId": handle.job_id }))
        .build();

    dispatcher.execute(request).await?;
    Ok(())
}
