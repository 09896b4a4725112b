/// The error taxonomy shared by every layer of the client.
///
/// Retry logic and callers alike are expected to consult the predicate
/// methods below rather than matching on `Display` text, which is
/// unstable and meant for humans.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{method} {path} -> unauthorized")]
    Unauthorized { method: String, path: String },

    #[error("{method} {path} -> forbidden")]
    Forbidden { method: String, path: String },

    #[error("{method} {path} -> not found")]
    NotFound { method: String, path: String },

    #[error("{method} {path} -> conflict")]
    Conflict { method: String, path: String },

    #[error("{method} {path} -> precondition failed")]
    PreconditionFailed { method: String, path: String },

    #[error("deadline exceeded")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{method} {path} -> service unavailable")]
    ServiceUnavailable { method: String, path: String },

    #[error("leadership changed, retry against new leader")]
    LeadershipChange,

    #[error("no agency leader, or leadership transition in progress")]
    NoLeaderOrOngoing,

    #[error("network error")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A request submitted with `async` is still pending; poll again with
    /// `asyncId(id)`.
    #[error("async job {0} is still in progress")]
    AsyncJobInProgress(String),

    #[error("agency key not found")]
    KeyNotFound,

    #[error("lock already held by this connection")]
    AlreadyLocked,

    #[error("lock is not held by this connection")]
    NotLocked,

    #[error("timed out waiting to acquire the lock")]
    LockTimeout,

    #[error("authentication credentials were not changed")]
    AuthenticationNotChanged,

    /// A structured server-application error: both the HTTP status and the
    /// server's own numeric error code are preserved.
    #[error("{method} {path} -> http {http_status} (error {arango_error_num}): {message}")]
    Server {
        method: String,
        path: String,
        http_status: u16,
        arango_error_num: i64,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    /// Classify a decoded [`crate::RawResponse`] into a structured error, or
    /// `None` if the status is 2xx. Never matches on body text beyond the
    /// server's own `errorNum`/`errorMessage` fields.
    pub fn from_response(
        method: &str,
        path: &str,
        response: &crate::request::RawResponse,
    ) -> Option<Self> {
        if response.is_success() {
            return None;
        }

        let error_num = response
            .body
            .get("errorNum")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let message = response
            .body
            .get("errorMessage")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with status {}", response.status));
        let method = method.to_string();
        let path = path.to_string();

        // 1495: no agency leader, or a leadership transition is in progress.
        if error_num == 1495 {
            return Some(ClusterError::NoLeaderOrOngoing);
        }

        Some(match response.status {
            401 => ClusterError::Unauthorized { method, path },
            403 => ClusterError::Forbidden { method, path },
            404 => ClusterError::NotFound { method, path },
            409 => ClusterError::Conflict { method, path },
            412 => ClusterError::PreconditionFailed { method, path },
            503 => ClusterError::ServiceUnavailable { method, path },
            http_status => ClusterError::Server {
                method,
                path,
                http_status,
                arango_error_num: error_num,
                message,
            },
        })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. } | ClusterError::KeyNotFound)
            || self.is_error_with_num(1202) // ERROR_ARANGO_DOCUMENT_NOT_FOUND-style
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, ClusterError::PreconditionFailed { .. })
            || matches!(self, ClusterError::Server { http_status: 412, .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, ClusterError::Forbidden { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ClusterError::InvalidArgument(_))
    }

    pub fn is_no_leader_or_ongoing(&self) -> bool {
        matches!(self, ClusterError::NoLeaderOrOngoing)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClusterError::Timeout | ClusterError::LockTimeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClusterError::Cancelled)
    }

    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, ClusterError::ServiceUnavailable { .. })
            || matches!(self, ClusterError::Server { http_status: 503, .. })
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ClusterError::Server { http_status, .. } => Some(*http_status),
            ClusterError::Unauthorized { .. } => Some(401),
            ClusterError::Forbidden { .. } => Some(403),
            ClusterError::NotFound { .. } => Some(404),
            ClusterError::Conflict { .. } => Some(409),
            ClusterError::PreconditionFailed { .. } => Some(412),
            ClusterError::ServiceUnavailable { .. } => Some(503),
            _ => None,
        }
    }

    /// True if this is a structured server error carrying the given
    /// `errorNum`. Never matches by parsing `Display` text.
    pub fn is_error_with_num(&self, num: i64) -> bool {
        matches!(self, ClusterError::Server { arango_error_num, .. } if *arango_error_num == num)
    }

    /// True if this is a structured server error carrying the given HTTP
    /// status code.
    pub fn is_error_with_code(&self, code: u16) -> bool {
        self.http_status() == Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_are_disjoint_from_display_text() {
        let err = ClusterError::Server {
            method: "PUT".into(),
            path: "/_api/document/x".into(),
            http_status: 412,
            arango_error_num: 1200,
            message: "conflict".into(),
        };
        assert!(err.is_precondition_failed());
        assert!(err.is_error_with_num(1200));
        assert!(!err.is_conflict());
    }

    #[test]
    fn from_response_maps_status_to_variant() {
        use crate::request::{Headers, RawResponse};
        use crate::Endpoint;

        let response = RawResponse {
            status: 404,
            headers: Headers::new(),
            body: serde_json::json!({"error": true, "errorNum": 1202, "errorMessage": "not found"}),
            raw: None,
            endpoint: Endpoint::parse("http://a:8529").unwrap(),
        };
        let err = ClusterError::from_response("GET", "/_api/document/x", &response).unwrap();
        assert!(err.is_not_found());
        assert_eq!(err.http_status(), Some(404));
    }

    #[test]
    fn from_response_recognizes_no_leader_by_error_num_regardless_of_status() {
        use crate::request::{Headers, RawResponse};
        use crate::Endpoint;

        let response = RawResponse {
            status: 503,
            headers: Headers::new(),
            body: serde_json::json!({"errorNum": 1495}),
            raw: None,
            endpoint: Endpoint::parse("http://a:8529").unwrap(),
        };
        let err = ClusterError::from_response("POST", "/_api/agency/write", &response).unwrap();
        assert!(err.is_no_leader_or_ongoing());
    }

    #[test]
    fn from_response_is_none_for_success() {
        use crate::request::{Headers, RawResponse};
        use crate::Endpoint;

        let response = RawResponse {
            status: 200,
            headers: Headers::new(),
            body: serde_json::Value::Null,
            raw: None,
            endpoint: Endpoint::parse("http://a:8529").unwrap(),
        };
        assert!(ClusterError::from_response("GET", "/_api/version", &response).is_none());
    }

    #[test]
    fn an_error_can_satisfy_several_predicates() {
        let err = ClusterError::Server {
            method: "GET".into(),
            path: "/_api/version".into(),
            http_status: 503,
            arango_error_num: 1495,
            message: "no leader".into(),
        };
        assert!(err.is_service_unavailable());
        assert!(err.is_error_with_num(1495));
        assert!(err.is_error_with_code(503));
    }
}
