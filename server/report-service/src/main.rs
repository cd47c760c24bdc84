//! Binary entrypoint for the failure report service.

use failure_reporter::context::{EnvironmentContext, StaticContext};
use failure_reporter::{
  Dispatch, EventCodec, MemoryCounterStore, MemoryRecordApi, RecordStore, ReportPipeline,
  ReporterConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use report_service::{router, spawn_workers, AppState, ChannelTransport, RetryPolicy};

const LOCAL_CONTAINER: &str = "local";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let port: u16 = std::env::var("PORT")
    .unwrap_or_else(|_| "5005".into())
    .parse()?;
  let workers: usize = std::env::var("REPORT_WORKERS")
    .unwrap_or_else(|_| "4".into())
    .parse()?;

  let mut config = ReporterConfig::from_env()?;
  let container_id = config
    .container_id()
    .unwrap_or(LOCAL_CONTAINER)
    .to_string();
  config.container_id = Some(container_id.clone());

  let api = Arc::new(MemoryRecordApi::new().with_container(container_id.as_str()));
  let store = Arc::new(
    RecordStore::new(api.clone(), config.fields.clone()).with_base_path(config.base_path.clone()),
  );

  let codec = EventCodec::default();
  let (transport, rx) = ChannelTransport::new();
  // Handles are detached; workers run for the life of the process.
  let _workers = spawn_workers(workers, rx, store, codec.clone(), RetryPolicy::default());

  let collector = EnvironmentContext::new(StaticContext::default(), config.environment.clone());
  let pipeline = ReportPipeline::new(
    config,
    Arc::new(MemoryCounterStore::new()),
    Arc::new(collector),
    Dispatch::Queued(Arc::new(transport)),
  )
  .with_codec(codec);

  let state = Arc::new(AppState {
    pipeline,
    api,
    container_id,
  });
  let app = router(state).layer(CorsLayer::permissive());

  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  info!(%addr, workers, "report-service listening");

  let listener = tokio::net::TcpListener::bind(addr).await?;
  axum::serve(listener, app).await?;

  Ok(())
}
