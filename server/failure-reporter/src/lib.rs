//! Failure reporter: deduplicating, rate-limited failure reporting.
//!
//! Fingerprints each failure from its kind, normalized message, and site;
//! admits it against per-fingerprint and global fixed-window budgets; and
//! records it as one external record per fingerprint, counting repeats instead
//! of creating duplicates. Failures can be encoded into primitive-only
//! transport records to be persisted by an asynchronous worker.

pub mod admission;
pub mod clock;
pub mod codec;
pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod types;

pub use admission::{AdmissionController, CounterStore, MemoryCounterStore};
pub use codec::{EventCodec, KindRegistry, TransportRecord};
pub use config::ReporterConfig;
pub use error::ReporterError;
pub use pipeline::{Dispatch, ReportJob, ReportOutcome, ReportPipeline, ReportTransport};
pub use record::{ExternalRecord, MemoryRecordApi, RecordApi, RecordStore};
pub use types::{FailureEvent, Fingerprint};
