//! HTTP boundary around the messaging core: accounts, room entry, history
//! and attachment upload. Authorization for private rooms happens here,
//! before a request ever reaches the engine.

pub mod attachments;
pub mod auth;
pub mod history;
pub mod middleware;
pub mod rooms;

use axum::http::StatusCode;
use tracing::error;

/// Run blocking store work off the async runtime, mapping failures to 500.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
