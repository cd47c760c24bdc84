//! Find-or-create/update of one external record per fingerprint.
//!
//! `RecordStore::record_occurrence` looks up a record by fingerprint and either
//! bumps its occurrence count or creates it. Lookup and write are separate API
//! calls with no lock around them: two concurrent first occurrences of one
//! fingerprint can both create a record. A store with a conditional create
//! (unique fingerprint) would close that gap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::FieldNames;
use crate::content::{BlockRenderer, ContentBlock, ContentRenderer};
use crate::error::ReporterError;
use crate::types::{ContextMap, FailureEvent, Fingerprint};

/// Longest stored title, ellipsis included.
pub const MAX_TITLE_CHARS: usize = 100;
/// Longest stored file path, ellipsis included.
pub const MAX_FILE_CHARS: usize = 200;

const ELLIPSIS: &str = "...";

// ---------------------------------------------------------------------------
// External record model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
  Title(String),
  Text(String),
  Number(Option<f64>),
  Date(DateTime<Utc>),
  Select(String),
}

/// A grouped failure as the external store holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
  /// Assigned by the store on create.
  #[serde(default)]
  pub id: Option<String>,
  pub container_id: String,
  pub properties: BTreeMap<String, PropertyValue>,
}

impl ExternalRecord {
  pub fn new(container_id: impl Into<String>) -> Self {
    Self {
      id: None,
      container_id: container_id.into(),
      properties: BTreeMap::new(),
    }
  }

  pub fn with(mut self, field: &str, value: PropertyValue) -> Self {
    self.set(field, value);
    self
  }

  pub fn set(&mut self, field: &str, value: PropertyValue) {
    self.properties.insert(field.to_string(), value);
  }

  pub fn get(&self, field: &str) -> Option<&PropertyValue> {
    self.properties.get(field)
  }

  pub fn text(&self, field: &str) -> Option<&str> {
    match self.properties.get(field)? {
      PropertyValue::Title(s) | PropertyValue::Text(s) | PropertyValue::Select(s) => Some(s),
      _ => None,
    }
  }

  pub fn number(&self, field: &str) -> Option<f64> {
    match self.properties.get(field)? {
      PropertyValue::Number(n) => *n,
      _ => None,
    }
  }

  pub fn date(&self, field: &str) -> Option<DateTime<Utc>> {
    match self.properties.get(field)? {
      PropertyValue::Date(d) => Some(*d),
      _ => None,
    }
  }
}

/// Handle to a resolved container (database).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
  pub id: String,
  pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// External record API port
// ---------------------------------------------------------------------------

/// Synchronous client for the external store. Async callers should run it on a
/// blocking thread.
pub trait RecordApi: Send + Sync {
  fn find_container(&self, container_id: &str) -> Result<Container, ReporterError>;

  /// Records in `container` whose `field` equals `value`, at most `limit`.
  fn query_equals(
    &self,
    container: &Container,
    field: &str,
    value: &str,
    limit: usize,
  ) -> Result<Vec<ExternalRecord>, ReporterError>;

  fn create_record(
    &self,
    record: ExternalRecord,
    blocks: Vec<ContentBlock>,
  ) -> Result<ExternalRecord, ReporterError>;

  fn update_record(&self, record: ExternalRecord) -> Result<ExternalRecord, ReporterError>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
  record: ExternalRecord,
  blocks: Vec<ContentBlock>,
}

/// In-process record API. Containers must be registered before use.
#[derive(Debug, Default)]
pub struct MemoryRecordApi {
  containers: Mutex<HashMap<String, Vec<StoredRecord>>>,
  container_lookups: AtomicUsize,
}

impl MemoryRecordApi {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_container(self, container_id: impl Into<String>) -> Self {
    self.add_container(container_id);
    self
  }

  pub fn add_container(&self, container_id: impl Into<String>) {
    self.lock().entry(container_id.into()).or_default();
  }

  pub fn records(&self, container_id: &str) -> Vec<ExternalRecord> {
    self
      .lock()
      .get(container_id)
      .map(|stored| stored.iter().map(|s| s.record.clone()).collect())
      .unwrap_or_default()
  }

  pub fn blocks(&self, record_id: &str) -> Option<Vec<ContentBlock>> {
    self
      .lock()
      .values()
      .flatten()
      .find(|s| s.record.id.as_deref() == Some(record_id))
      .map(|s| s.blocks.clone())
  }

  /// Number of `find_container` calls served.
  pub fn container_lookups(&self) -> usize {
    self.container_lookups.load(Ordering::Relaxed)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<StoredRecord>>> {
    self.containers.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl RecordApi for MemoryRecordApi {
  fn find_container(&self, container_id: &str) -> Result<Container, ReporterError> {
    self.container_lookups.fetch_add(1, Ordering::Relaxed);
    if self.lock().contains_key(container_id) {
      Ok(Container {
        id: container_id.to_string(),
        title: None,
      })
    } else {
      Err(ReporterError::persistence(
        "find_container",
        format!("container {} not found", container_id),
      ))
    }
  }

  fn query_equals(
    &self,
    container: &Container,
    field: &str,
    value: &str,
    limit: usize,
  ) -> Result<Vec<ExternalRecord>, ReporterError> {
    let containers = self.lock();
    let stored = containers.get(&container.id).ok_or_else(|| {
      ReporterError::persistence("query", format!("container {} not found", container.id))
    })?;
    Ok(
      stored
        .iter()
        .filter(|s| s.record.text(field) == Some(value))
        .take(limit)
        .map(|s| s.record.clone())
        .collect(),
    )
  }

  fn create_record(
    &self,
    mut record: ExternalRecord,
    blocks: Vec<ContentBlock>,
  ) -> Result<ExternalRecord, ReporterError> {
    let mut containers = self.lock();
    let stored = containers.get_mut(&record.container_id).ok_or_else(|| {
      ReporterError::persistence("create", format!("container {} not found", record.container_id))
    })?;
    record.id = Some(uuid::Uuid::new_v4().to_string());
    stored.push(StoredRecord {
      record: record.clone(),
      blocks,
    });
    Ok(record)
  }

  fn update_record(&self, record: ExternalRecord) -> Result<ExternalRecord, ReporterError> {
    let mut containers = self.lock();
    let slot = containers
      .get_mut(&record.container_id)
      .and_then(|stored| {
        stored
          .iter_mut()
          .find(|s| s.record.id.is_some() && s.record.id == record.id)
      })
      .ok_or_else(|| ReporterError::persistence("update", "record not found"))?;
    slot.record = record.clone();
    Ok(record)
  }
}

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

pub struct RecordStore {
  api: Arc<dyn RecordApi>,
  renderer: Arc<dyn ContentRenderer>,
  fields: FieldNames,
  base_path: Option<String>,
  /// Last resolved container; replaced when a different id is requested.
  cache: Mutex<Option<Container>>,
}

impl RecordStore {
  pub fn new(api: Arc<dyn RecordApi>, fields: FieldNames) -> Self {
    Self {
      api,
      renderer: Arc::new(BlockRenderer),
      fields,
      base_path: None,
      cache: Mutex::new(None),
    }
  }

  pub fn with_renderer(mut self, renderer: Arc<dyn ContentRenderer>) -> Self {
    self.renderer = renderer;
    self
  }

  pub fn with_base_path(mut self, base_path: Option<String>) -> Self {
    self.base_path = base_path.filter(|p| !p.is_empty());
    self
  }

  pub fn fields(&self) -> &FieldNames {
    &self.fields
  }

  /// Bump the record for `fingerprint`, or create it on first occurrence.
  pub fn record_occurrence(
    &self,
    container_id: &str,
    event: &FailureEvent,
    fingerprint: &Fingerprint,
    environment: &str,
    context: &ContextMap,
  ) -> Result<ExternalRecord, ReporterError> {
    match self.find_existing(container_id, fingerprint)? {
      Some(existing) => self.update_existing(existing),
      None => self.create_new(container_id, event, fingerprint, environment, context),
    }
  }

  pub fn find_existing(
    &self,
    container_id: &str,
    fingerprint: &Fingerprint,
  ) -> Result<Option<ExternalRecord>, ReporterError> {
    let container = self.container(container_id)?;
    let mut found =
      self
        .api
        .query_equals(&container, &self.fields.fingerprint, fingerprint.as_str(), 1)?;
    Ok(if found.is_empty() {
      None
    } else {
      Some(found.swap_remove(0))
    })
  }

  /// Occurrence count stored on `record`; absent or malformed values count as zero.
  pub fn occurrence_count(&self, record: &ExternalRecord) -> u64 {
    record
      .number(&self.fields.occurrences)
      .filter(|n| n.is_finite() && *n >= 0.0)
      .map(|n| n as u64)
      .unwrap_or(0)
  }

  /// Build the property set for a first occurrence.
  pub fn build_record(
    &self,
    container_id: &str,
    event: &FailureEvent,
    fingerprint: &Fingerprint,
    environment: &str,
    now: DateTime<Utc>,
  ) -> ExternalRecord {
    let f = &self.fields;
    ExternalRecord::new(container_id)
      .with(&f.title, PropertyValue::Title(record_title(event)))
      .with(&f.first_seen, PropertyValue::Date(now))
      .with(&f.last_seen, PropertyValue::Date(now))
      .with(&f.occurrences, PropertyValue::Number(Some(1.0)))
      .with(&f.environment, PropertyValue::Select(environment.to_string()))
      .with(&f.kind, PropertyValue::Text(event.kind.clone()))
      .with(&f.file, PropertyValue::Text(self.truncate_file(event.file())))
      .with(&f.line, PropertyValue::Number(Some(f64::from(event.line()))))
      .with(&f.fingerprint, PropertyValue::Text(fingerprint.0.clone()))
  }

  /// Resolve a container, failing with a configuration error naming it.
  pub fn verify_container(&self, container_id: &str) -> Result<Container, ReporterError> {
    self.container(container_id)
  }

  pub fn clear_cache(&self) {
    *self.cache_slot() = None;
  }

  fn create_new(
    &self,
    container_id: &str,
    event: &FailureEvent,
    fingerprint: &Fingerprint,
    environment: &str,
    context: &ContextMap,
  ) -> Result<ExternalRecord, ReporterError> {
    let record = self.build_record(container_id, event, fingerprint, environment, Utc::now());
    let blocks = self.renderer.render(event, context);
    debug!(fingerprint = %fingerprint.short(), "creating failure record");
    self.api.create_record(record, blocks)
  }

  fn update_existing(&self, mut record: ExternalRecord) -> Result<ExternalRecord, ReporterError> {
    let occurrences = self.occurrence_count(&record) + 1;
    record.set(&self.fields.last_seen, PropertyValue::Date(Utc::now()));
    record.set(
      &self.fields.occurrences,
      PropertyValue::Number(Some(occurrences as f64)),
    );
    debug!(record_id = ?record.id, occurrences, "updating failure record");
    self.api.update_record(record)
  }

  fn container(&self, container_id: &str) -> Result<Container, ReporterError> {
    if let Some(cached) = self.cache_slot().as_ref() {
      if cached.id == container_id {
        return Ok(cached.clone());
      }
    }

    let container = self.api.find_container(container_id).map_err(|e| {
      ReporterError::configuration(format!(
        "unable to access container '{}': {}",
        container_id, e
      ))
    })?;
    *self.cache_slot() = Some(container.clone());
    Ok(container)
  }

  fn cache_slot(&self) -> std::sync::MutexGuard<'_, Option<Container>> {
    self.cache.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn truncate_file(&self, file: &str) -> String {
    let relative = self
      .base_path
      .as_deref()
      .and_then(|base| file.strip_prefix(base.trim_end_matches('/')))
      // Only strip whole path components: `/srv/app` is not a prefix of `/srv/application`.
      .filter(|rest| rest.is_empty() || rest.starts_with('/'))
      .map(|rest| rest.trim_start_matches('/'))
      .unwrap_or(file);

    let len = relative.chars().count();
    if len <= MAX_FILE_CHARS {
      return relative.to_string();
    }
    let keep = MAX_FILE_CHARS - ELLIPSIS.len();
    let tail: String = relative.chars().skip(len - keep).collect();
    format!("{}{}", ELLIPSIS, tail)
  }
}

/// `<ShortKind>: <message>`, capped at `MAX_TITLE_CHARS` with a trailing ellipsis.
pub fn record_title(event: &FailureEvent) -> String {
  let short = event.short_kind();
  let title = if event.message.is_empty() {
    short.to_string()
  } else {
    format!("{}: {}", short, event.message)
  };

  if title.chars().count() <= MAX_TITLE_CHARS {
    return title;
  }
  let mut out: String = title.chars().take(MAX_TITLE_CHARS - ELLIPSIS.len()).collect();
  out.push_str(ELLIPSIS);
  out
}
