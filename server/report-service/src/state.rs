//! Shared application state.

use failure_reporter::{MemoryRecordApi, ReportPipeline};
use std::sync::Arc;

pub struct AppState {
  pub pipeline: ReportPipeline,
  /// Backing store, exposed read-only through `/records`.
  pub api: Arc<MemoryRecordApi>,
  pub container_id: String,
}
