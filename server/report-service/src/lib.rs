//! Failure Report Service
//!
//! HTTP front end for the failure reporter. Reports are admitted on the request
//! path and persisted by a tokio worker pool. Bind to 127.0.0.1 by default
//! (internal only).

mod handlers;
mod state;
mod transport;
mod types;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

pub use handlers::{health, records, report, status};
pub use state::AppState;
pub use transport::{spawn_workers, ChannelTransport, RetryPolicy};

pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/status", get(status))
    .route("/records", get(records))
    .route("/report", post(report))
    .with_state(state)
}
