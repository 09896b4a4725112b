//! Shared data model for the nebula cluster client: endpoints, the per-call
//! option context, the request/response shapes, and the error taxonomy.
//!
//! Everything here is synchronous and I/O-free; the transport and dispatch
//! crates build on top of it.

mod endpoint;
mod error;
mod options;
mod request;

pub use endpoint::{EmptyEndpointSet, Endpoint, EndpointSet, Scheme, ServerRole};
pub use error::{ClusterError, Result};
pub use options::{OverwriteMode, RequestContext};
pub use request::{Headers, Method, RawResponse, Request, RequestBuilder};

/// Re-exported so callers can build a [`RequestContext::with_cancellation`]
/// token without adding their own `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
