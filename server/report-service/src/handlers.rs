//! HTTP handlers for the report service.

use axum::{extract::State, http::StatusCode, Json};
use failure_reporter::pipeline::ReporterStatus;
use failure_reporter::{ExternalRecord, ReportOutcome};
use std::sync::Arc;

use crate::state::AppState;
use crate::types::ReportPayload;

pub async fn health() -> &'static str {
  "ok"
}

/// 202 when the report was admitted and queued, 200 with the drop reason otherwise.
pub async fn report(
  State(state): State<Arc<AppState>>,
  Json(payload): Json<ReportPayload>,
) -> (StatusCode, Json<ReportOutcome>) {
  let event = state.pipeline.codec().decode(&payload.record);
  let outcome = state.pipeline.submit_with_context(&event, payload.context);

  let status = if outcome.is_accepted() {
    StatusCode::ACCEPTED
  } else {
    StatusCode::OK
  };
  (status, Json(outcome))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<ReporterStatus> {
  Json(state.pipeline.status())
}

pub async fn records(State(state): State<Arc<AppState>>) -> Json<Vec<ExternalRecord>> {
  Json(state.api.records(&state.container_id))
}
