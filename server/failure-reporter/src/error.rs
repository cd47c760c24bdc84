//! Structured error types for the failure reporter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
  /// Missing or invalid container id, credentials, or settings.
  #[error("configuration: {0}")]
  Configuration(String),

  /// The external record store rejected or could not complete an operation.
  #[error("persistence: {operation}: {reason}")]
  Persistence { operation: String, reason: String },

  #[error("counter store: {0}")]
  CounterStore(String),

  #[error("transport: {0}")]
  Transport(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl ReporterError {
  pub fn configuration(msg: impl Into<String>) -> Self {
    Self::Configuration(msg.into())
  }

  pub fn persistence(operation: &str, reason: impl Into<String>) -> Self {
    Self::Persistence {
      operation: operation.to_string(),
      reason: reason.into(),
    }
  }

  pub fn counter_store(msg: impl Into<String>) -> Self {
    Self::CounterStore(msg.into())
  }

  pub fn transport(msg: impl Into<String>) -> Self {
    Self::Transport(msg.into())
  }
}
