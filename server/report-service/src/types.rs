//! Request/response types for the report service.

use failure_reporter::types::ContextMap;
use failure_reporter::TransportRecord;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct ReportPayload {
  pub record: TransportRecord,
  /// Context gathered by the caller (request, user, headers).
  #[serde(default)]
  pub context: ContextMap,
}
