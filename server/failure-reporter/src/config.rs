//! Reporter configuration with sane defaults and environment overrides.

use std::env;

use crate::error::ReporterError;

const ENV_PREFIX: &str = "FAILURE_REPORTER_";

/// Admission (rate limit) settings.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
  pub enabled: bool,
  /// Reports admitted per key per 60 second window.
  pub max_per_window: u64,
}

impl Default for AdmissionConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_per_window: 10,
    }
  }
}

/// Property names of the external record. Must match the container's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
  pub title: String,
  pub first_seen: String,
  pub last_seen: String,
  pub occurrences: String,
  pub environment: String,
  pub fingerprint: String,
  pub kind: String,
  pub file: String,
  pub line: String,
}

impl Default for FieldNames {
  fn default() -> Self {
    Self {
      title: "Title".into(),
      first_seen: "First Seen".into(),
      last_seen: "Last Seen".into(),
      occurrences: "Occurrences".into(),
      environment: "Environment".into(),
      fingerprint: "Fingerprint".into(),
      kind: "Exception Class".into(),
      file: "File".into(),
      line: "Line".into(),
    }
  }
}

/// Tunables for the report pipeline.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
  pub enabled: bool,
  /// Container (database) that holds failure records.
  pub container_id: Option<String>,
  /// Environment tag written on new records.
  pub environment: String,
  /// Kinds never reported. An entry ending in `*` matches by prefix.
  pub ignored_kinds: Vec<String>,
  pub admission: AdmissionConfig,
  pub fields: FieldNames,
  /// Prefix stripped from file paths before they are stored.
  pub base_path: Option<String>,
}

impl Default for ReporterConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      container_id: None,
      environment: "production".into(),
      ignored_kinds: Vec::new(),
      admission: AdmissionConfig::default(),
      fields: FieldNames::default(),
      base_path: None,
    }
  }
}

impl ReporterConfig {
  /// Defaults overridden by `FAILURE_REPORTER_*` environment variables.
  pub fn from_env() -> Result<Self, ReporterError> {
    Self::from_lookup(|name| env::var(name).ok())
  }

  /// Same as `from_env`, reading variables through `lookup`.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ReporterError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let var = |suffix: &str| {
      lookup(&format!("{}{}", ENV_PREFIX, suffix))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    };

    let mut config = Self::default();

    if let Some(v) = var("ENABLED") {
      config.enabled = parse_bool("ENABLED", &v)?;
    }
    config.container_id = var("CONTAINER_ID");
    if let Some(v) = var("ENVIRONMENT") {
      config.environment = v;
    }
    if let Some(v) = var("IGNORED_KINDS") {
      config.ignored_kinds = v
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect();
    }
    if let Some(v) = var("ADMISSION_ENABLED") {
      config.admission.enabled = parse_bool("ADMISSION_ENABLED", &v)?;
    }
    if let Some(v) = var("ADMISSION_MAX") {
      config.admission.max_per_window = v.parse().map_err(|_| {
        ReporterError::configuration(format!(
          "{}ADMISSION_MAX: expected a non-negative integer, got {:?}",
          ENV_PREFIX, v
        ))
      })?;
    }
    config.base_path = var("BASE_PATH");

    let fields = &mut config.fields;
    for (suffix, slot) in [
      ("FIELD_TITLE", &mut fields.title),
      ("FIELD_FIRST_SEEN", &mut fields.first_seen),
      ("FIELD_LAST_SEEN", &mut fields.last_seen),
      ("FIELD_OCCURRENCES", &mut fields.occurrences),
      ("FIELD_ENVIRONMENT", &mut fields.environment),
      ("FIELD_FINGERPRINT", &mut fields.fingerprint),
      ("FIELD_KIND", &mut fields.kind),
      ("FIELD_FILE", &mut fields.file),
      ("FIELD_LINE", &mut fields.line),
    ] {
      if let Some(v) = var(suffix) {
        *slot = v;
      }
    }

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ReporterError> {
    if self.admission.enabled && self.admission.max_per_window == 0 {
      return Err(ReporterError::configuration(
        "admission.max_per_window must be at least 1 while admission is enabled",
      ));
    }
    if self.environment.is_empty() {
      return Err(ReporterError::configuration("environment must not be empty"));
    }
    Ok(())
  }

  /// The configured container id, if present and non-empty.
  pub fn container_id(&self) -> Option<&str> {
    self.container_id.as_deref().filter(|id| !id.is_empty())
  }

  pub fn is_ignored(&self, kind: &str) -> bool {
    self.ignored_kinds.iter().any(|entry| match entry.strip_suffix('*') {
      Some(prefix) => kind.starts_with(prefix),
      None => entry == kind,
    })
  }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ReporterError> {
  match value.to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(ReporterError::configuration(format!(
      "{}{}: expected a boolean, got {:?}",
      ENV_PREFIX, name, value
    ))),
  }
}
