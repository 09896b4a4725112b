use nebula_core::{Method, Request};
use nebula_dispatch::Dispatcher;

/// Instance-scoped home for the handful of probes a connection only ever
/// needs to run once: right now, whether the backup admin API is compiled
/// into the target server at all. Kept off the [`crate::Connection`] struct
/// itself so it can be swapped for a test double without touching dispatch.
pub struct Diagnostics {
    backup_api_available: tokio::sync::OnceCell<bool>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            backup_api_available: tokio::sync::OnceCell::new(),
        }
    }

    /// Probes `GET /_admin/backup/list` once and caches whether it answered
    /// successfully. Subsequent calls never touch the network again.
    pub async fn backup_api_available(&self, dispatcher: &Dispatcher) -> bool {
        *self
            .backup_api_available
            .get_or_init(|| async {
                let request = Request::builder(Method::Get)
                    .segment("_admin")
                    .segment("backup")
                    .segment("list")
                    .build();
                matches!(dispatcher.execute(request).await, Ok(response) if response.is_success())
            })
            .await
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
