//! Async transport: an unbounded tokio channel drained by a worker pool.

use failure_reporter::pipeline::ReportJob;
use failure_reporter::{EventCodec, ExternalRecord, RecordStore, ReportTransport, ReporterError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sending half, plugged into the pipeline as `Dispatch::Queued`.
#[derive(Clone)]
pub struct ChannelTransport {
  tx: mpsc::UnboundedSender<ReportJob>,
}

impl ChannelTransport {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<ReportJob>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

impl ReportTransport for ChannelTransport {
  fn enqueue(&self, job: ReportJob) -> Result<(), ReporterError> {
    self
      .tx
      .send(job)
      .map_err(|_| ReporterError::transport("report queue is closed"))
  }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  /// Delay before the second attempt; doubles after each failure.
  pub base_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_backoff: Duration::from_millis(100),
    }
  }
}

/// Start `workers` tasks that persist jobs until every sender is dropped.
pub fn spawn_workers(
  workers: usize,
  rx: mpsc::UnboundedReceiver<ReportJob>,
  store: Arc<RecordStore>,
  codec: EventCodec,
  retry: RetryPolicy,
) -> Vec<JoinHandle<()>> {
  let rx = Arc::new(Mutex::new(rx));
  (0..workers.max(1))
    .map(|worker| {
      let rx = rx.clone();
      let store = store.clone();
      let codec = codec.clone();
      tokio::spawn(async move {
        loop {
          let job = { rx.lock().await.recv().await };
          let Some(job) = job else {
            debug!(worker, "report queue closed, worker exiting");
            break;
          };
          process_with_retry(Arc::new(job), store.clone(), codec.clone(), retry).await;
        }
      })
    })
    .collect()
}

/// Run one job, retrying with exponential backoff. Gives up by calling `ReportJob::failed`.
///
/// `RecordApi` calls are synchronous, so each attempt runs on the blocking pool.
pub async fn process_with_retry(
  job: Arc<ReportJob>,
  store: Arc<RecordStore>,
  codec: EventCodec,
  retry: RetryPolicy,
) -> Option<ExternalRecord> {
  let mut attempt = 0;
  loop {
    attempt += 1;
    match attempt_once(job.clone(), store.clone(), codec.clone()).await {
      Ok(record) => return Some(record),
      Err(err) if attempt < retry.max_attempts => {
        let delay = retry.base_backoff * 2u32.saturating_pow(attempt - 1);
        warn!(attempt, error = %err, ?delay, "report job failed, retrying");
        tokio::time::sleep(delay).await;
      }
      Err(err) => {
        job.failed(&err);
        return None;
      }
    }
  }
}

async fn attempt_once(
  job: Arc<ReportJob>,
  store: Arc<RecordStore>,
  codec: EventCodec,
) -> Result<ExternalRecord, ReporterError> {
  tokio::task::spawn_blocking(move || job.process(&store, &codec))
    .await
    .map_err(|e| ReporterError::transport(format!("report task aborted: {}", e)))?
}

#[cfg(test)]
mod tests {
  use super::*;
  use failure_reporter::config::FieldNames;
  use failure_reporter::content::ContentBlock;
  use failure_reporter::context::StaticContext;
  use failure_reporter::record::Container;
  use failure_reporter::{
    Dispatch, FailureEvent, MemoryCounterStore, MemoryRecordApi, RecordApi, ReportPipeline,
    ReporterConfig,
  };

  const CONTAINER: &str = "failures";

  fn fast_retry() -> RetryPolicy {
    RetryPolicy {
      max_attempts: 3,
      base_backoff: Duration::from_millis(1),
    }
  }

  fn config() -> ReporterConfig {
    ReporterConfig {
      container_id: Some(CONTAINER.into()),
      ..ReporterConfig::default()
    }
  }

  #[tokio::test]
  async fn workers_persist_queued_reports() {
    let api = Arc::new(MemoryRecordApi::new().with_container(CONTAINER));
    let store = Arc::new(RecordStore::new(api.clone(), FieldNames::default()));
    let (transport, rx) = ChannelTransport::new();
    let handles = spawn_workers(2, rx, store, EventCodec::default(), fast_retry());

    let pipeline = ReportPipeline::new(
      config(),
      Arc::new(MemoryCounterStore::new()),
      Arc::new(StaticContext::default()),
      Dispatch::Queued(Arc::new(transport)),
    );
    let event = FailureEvent::new("Db\\Deadlock", "deadlock on orders").at("src/orders.rs", 7);
    assert!(pipeline.report(&event));
    assert!(pipeline.report(&event.clone().at("src/orders.rs", 8)));

    // Closing the queue lets the workers drain and exit.
    drop(pipeline);
    for handle in handles {
      handle.await.unwrap();
    }

    assert_eq!(api.records(CONTAINER).len(), 2);
  }

  #[tokio::test]
  async fn failing_job_gives_up_after_max_attempts() {
    let api = Arc::new(MemoryRecordApi::new());
    let store = Arc::new(RecordStore::new(api.clone(), FieldNames::default()));
    let codec = EventCodec::default();
    let event = FailureEvent::new("E", "m");
    let job = Arc::new(ReportJob {
      container_id: "missing".into(),
      environment: "test".into(),
      fingerprint: failure_reporter::fingerprint::generate(&event),
      record: codec.encode(&event),
      context: Default::default(),
    });

    let result = process_with_retry(job, store, codec, fast_retry()).await;
    assert!(result.is_none());
    assert_eq!(api.container_lookups(), 3);
  }

  /// Holds `find_container` until the test releases it.
  struct GatedApi {
    inner: MemoryRecordApi,
    release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
  }

  impl RecordApi for GatedApi {
    fn find_container(&self, container_id: &str) -> Result<Container, ReporterError> {
      let released = self
        .release
        .lock()
        .unwrap()
        .recv_timeout(Duration::from_secs(5));
      if released.is_err() {
        return Err(ReporterError::transport("gate never opened"));
      }
      self.inner.find_container(container_id)
    }

    fn query_equals(
      &self,
      container: &Container,
      field: &str,
      value: &str,
      limit: usize,
    ) -> Result<Vec<ExternalRecord>, ReporterError> {
      self.inner.query_equals(container, field, value, limit)
    }

    fn create_record(
      &self,
      record: ExternalRecord,
      blocks: Vec<ContentBlock>,
    ) -> Result<ExternalRecord, ReporterError> {
      self.inner.create_record(record, blocks)
    }

    fn update_record(&self, record: ExternalRecord) -> Result<ExternalRecord, ReporterError> {
      self.inner.update_record(record)
    }
  }

  #[tokio::test]
  async fn blocking_record_api_does_not_stall_the_runtime() {
    let (open, release) = std::sync::mpsc::channel();
    let api = Arc::new(GatedApi {
      inner: MemoryRecordApi::new().with_container(CONTAINER),
      release: std::sync::Mutex::new(release),
    });
    let store = Arc::new(RecordStore::new(api.clone(), FieldNames::default()));
    let codec = EventCodec::default();
    let event = FailureEvent::new("E", "m");
    let job = Arc::new(ReportJob {
      container_id: CONTAINER.into(),
      environment: "test".into(),
      fingerprint: failure_reporter::fingerprint::generate(&event),
      record: codec.encode(&event),
      context: Default::default(),
    });
    let single = RetryPolicy {
      max_attempts: 1,
      base_backoff: Duration::from_millis(1),
    };

    let handle = tokio::spawn(process_with_retry(job, store, codec, single));
    // This timer only fires if the job is not holding the runtime thread.
    tokio::time::sleep(Duration::from_millis(20)).await;
    open.send(()).unwrap();

    assert!(handle.await.unwrap().is_some());
    assert_eq!(api.inner.records(CONTAINER).len(), 1);
  }

  #[tokio::test]
  async fn enqueue_fails_once_receiver_is_gone() {
    let (transport, rx) = ChannelTransport::new();
    drop(rx);
    let event = FailureEvent::new("E", "m");
    let codec = EventCodec::default();
    let job = ReportJob {
      container_id: CONTAINER.into(),
      environment: "test".into(),
      fingerprint: failure_reporter::fingerprint::generate(&event),
      record: codec.encode(&event),
      context: Default::default(),
    };
    assert!(matches!(
      transport.enqueue(job),
      Err(ReporterError::Transport(_))
    ));
  }
}
