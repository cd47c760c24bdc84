//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is a TransportRecord. Output lines are either:
//! - A ReportOutcome (dispatched with its fingerprint, or dropped with a reason)
//! - An ErrorOutput (when the line is not a valid record)
//!
//! At end of input every aggregated record in the in-memory store is written,
//! one per line. Logs go to stderr.

use failure_reporter::context::{EnvironmentContext, ProcessContextCollector};
use failure_reporter::types::ErrorOutput;
use failure_reporter::{
  Dispatch, EventCodec, MemoryCounterStore, MemoryRecordApi, RecordStore, ReportPipeline,
  ReporterConfig, TransportRecord,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const LOCAL_CONTAINER: &str = "local";

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();

  let mut config = ReporterConfig::from_env()?;
  let container_id = config
    .container_id()
    .unwrap_or(LOCAL_CONTAINER)
    .to_string();
  config.container_id = Some(container_id.clone());

  let api = Arc::new(MemoryRecordApi::new().with_container(container_id.as_str()));
  let store = RecordStore::new(api.clone(), config.fields.clone())
    .with_base_path(config.base_path.clone());
  let collector = EnvironmentContext::new(ProcessContextCollector, config.environment.clone());
  let codec = EventCodec::default();
  let pipeline = ReportPipeline::new(
    config,
    Arc::new(MemoryCounterStore::new()),
    Arc::new(collector),
    Dispatch::Inline(Arc::new(store)),
  );

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  for (index, line) in stdin.lock().lines().enumerate() {
    let line = line?;

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let record: TransportRecord = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        let err = ErrorOutput::new(format!("json parse: {}", e)).at_line(index + 1);
        serde_json::to_writer(&mut out, &err)?;
        writeln!(out)?;
        continue;
      }
    };

    let event = codec.decode(&record);
    let outcome = pipeline.submit(&event);
    serde_json::to_writer(&mut out, &outcome)?;
    writeln!(out)?;
  }

  for record in api.records(&container_id) {
    serde_json::to_writer(&mut out, &record)?;
    writeln!(out)?;
  }

  out.flush()?;
  Ok(())
}
