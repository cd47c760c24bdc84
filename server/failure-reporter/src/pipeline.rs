//! Report pipeline: gate, fingerprint, admit, dispatch.
//!
//! `report` never fails and never panics into the caller. Every drop, whether
//! intentional (disabled, ignored, rate limited) or caused by a collaborator
//! error, is a `false` return plus a log entry.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::admission::{AdmissionController, AdmissionSummary, CounterStore};
use crate::codec::{EventCodec, TransportRecord};
use crate::config::ReporterConfig;
use crate::context::ContextCollector;
use crate::error::ReporterError;
use crate::fingerprint;
use crate::record::{ExternalRecord, RecordStore};
use crate::types::{ContextMap, FailureEvent, Fingerprint};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Which admission budget denied a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
  Global,
  Fingerprint,
}

impl fmt::Display for Limit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Global => "global",
      Self::Fingerprint => "fingerprint",
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "limit", rename_all = "snake_case")]
pub enum DropReason {
  Disabled,
  NotConfigured,
  Ignored,
  RateLimited(Limit),
  /// A collaborator failed; details are in the log.
  Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
  Dispatched { fingerprint: Fingerprint },
  Dropped(DropReason),
}

impl ReportOutcome {
  pub fn is_accepted(&self) -> bool {
    matches!(self, Self::Dispatched { .. })
  }
}

// ---------------------------------------------------------------------------
// Async hand-off
// ---------------------------------------------------------------------------

/// Payload that crosses the asynchronous boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportJob {
  pub container_id: String,
  pub environment: String,
  pub fingerprint: Fingerprint,
  pub record: TransportRecord,
  #[serde(default)]
  pub context: ContextMap,
}

impl ReportJob {
  /// Persistence step, run on a worker.
  pub fn process(
    &self,
    store: &RecordStore,
    codec: &EventCodec,
  ) -> Result<ExternalRecord, ReporterError> {
    let event = codec.decode(&self.record);
    store.record_occurrence(
      &self.container_id,
      &event,
      &self.fingerprint,
      &self.environment,
      &self.context,
    )
  }

  /// Called by the transport once it gives up on this job.
  pub fn failed(&self, err: &ReporterError) {
    error!(
      reporting_error = %err,
      original_kind = %self.record.kind,
      original_message = %self.record.message,
      fingerprint = %self.fingerprint.short(),
      "failed to report failure (queued job)"
    );
  }
}

/// Queue collaborator. Delivery is at-least-once; retries and backoff belong
/// to the implementation.
pub trait ReportTransport: Send + Sync {
  fn enqueue(&self, job: ReportJob) -> Result<(), ReporterError>;
}

/// Where admitted reports go.
#[derive(Clone)]
pub enum Dispatch {
  /// Persist synchronously on the caller's thread.
  Inline(Arc<RecordStore>),
  /// Encode and hand off to a transport.
  Queued(Arc<dyn ReportTransport>),
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReporterStatus {
  pub enabled: bool,
  pub container_configured: bool,
  /// `***configured***` when set; the id itself is never exposed.
  pub container_id: Option<&'static str>,
  pub environment: String,
  pub admission: AdmissionSummary,
  pub ignored_kinds: usize,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct ReportPipeline {
  config: ReporterConfig,
  admission: AdmissionController,
  collector: Arc<dyn ContextCollector>,
  codec: EventCodec,
  dispatch: Dispatch,
}

impl ReportPipeline {
  pub fn new(
    config: ReporterConfig,
    counters: Arc<dyn CounterStore>,
    collector: Arc<dyn ContextCollector>,
    dispatch: Dispatch,
  ) -> Self {
    let admission = AdmissionController::new(counters, &config.admission);
    Self {
      config,
      admission,
      collector,
      codec: EventCodec::default(),
      dispatch,
    }
  }

  pub fn with_codec(mut self, codec: EventCodec) -> Self {
    self.codec = codec;
    self
  }

  pub fn config(&self) -> &ReporterConfig {
    &self.config
  }

  pub fn admission(&self) -> &AdmissionController {
    &self.admission
  }

  pub fn codec(&self) -> &EventCodec {
    &self.codec
  }

  /// Report a failure. `true` means it was admitted and handed off for persistence.
  pub fn report(&self, event: &FailureEvent) -> bool {
    self.submit(event).is_accepted()
  }

  /// Like `report`, with the reason for any drop.
  pub fn submit(&self, event: &FailureEvent) -> ReportOutcome {
    self.submit_with_context(event, ContextMap::new())
  }

  /// Like `submit`; `extra` is merged over the collected context.
  pub fn submit_with_context(&self, event: &FailureEvent, extra: ContextMap) -> ReportOutcome {
    if !self.config.enabled {
      return ReportOutcome::Dropped(DropReason::Disabled);
    }
    let Some(container_id) = self.config.container_id() else {
      warn!("failure reporter: container id is not configured");
      return ReportOutcome::Dropped(DropReason::NotConfigured);
    };
    if self.config.is_ignored(&event.kind) {
      return ReportOutcome::Dropped(DropReason::Ignored);
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
      self.admit_and_dispatch(container_id, event, extra)
    }));

    match result {
      Ok(Ok(outcome)) => outcome,
      Ok(Err(err)) => {
        log_reporting_error(&err.to_string(), event);
        ReportOutcome::Dropped(DropReason::Failed)
      }
      Err(payload) => {
        log_reporting_error(&panic_message(payload.as_ref()), event);
        ReportOutcome::Dropped(DropReason::Failed)
      }
    }
  }

  pub fn is_configured(&self) -> bool {
    self.config.enabled && self.config.container_id().is_some()
  }

  pub fn status(&self) -> ReporterStatus {
    let configured = self.config.container_id().is_some();
    ReporterStatus {
      enabled: self.config.enabled,
      container_configured: configured,
      container_id: configured.then_some("***configured***"),
      environment: self.config.environment.clone(),
      admission: self.admission.summary(),
      ignored_kinds: self.config.ignored_kinds.len(),
    }
  }

  fn admit_and_dispatch(
    &self,
    container_id: &str,
    event: &FailureEvent,
    extra: ContextMap,
  ) -> Result<ReportOutcome, ReporterError> {
    let fingerprint = fingerprint::generate(event);

    if !self.admission.allow_global()? {
      log_rate_limited(Limit::Global, event, &fingerprint);
      return Ok(ReportOutcome::Dropped(DropReason::RateLimited(Limit::Global)));
    }
    if !self.admission.allow(fingerprint.as_str())? {
      log_rate_limited(Limit::Fingerprint, event, &fingerprint);
      return Ok(ReportOutcome::Dropped(DropReason::RateLimited(
        Limit::Fingerprint,
      )));
    }

    let mut context = self.collector.collect();
    context.extend(extra);

    match &self.dispatch {
      Dispatch::Inline(store) => {
        store.record_occurrence(
          container_id,
          event,
          &fingerprint,
          &self.config.environment,
          &context,
        )?;
      }
      Dispatch::Queued(transport) => {
        transport.enqueue(ReportJob {
          container_id: container_id.to_string(),
          environment: self.config.environment.clone(),
          fingerprint: fingerprint.clone(),
          record: self.codec.encode(event),
          context,
        })?;
      }
    }

    Ok(ReportOutcome::Dispatched { fingerprint })
  }
}

fn log_rate_limited(limit: Limit, event: &FailureEvent, fingerprint: &Fingerprint) {
  debug!(
    limit = %limit,
    kind = %event.kind,
    message = %event.message,
    fingerprint = %fingerprint.short(),
    "failure report rate limited"
  );
}

fn log_reporting_error(reporting_error: &str, event: &FailureEvent) {
  error!(
    reporting_error,
    original_kind = %event.kind,
    original_message = %event.message,
    "failed to report failure"
  );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    format!("panic: {}", s)
  } else if let Some(s) = payload.downcast_ref::<String>() {
    format!("panic: {}", s)
  } else {
    "panic".to_string()
  }
}
