//! Transport-safe encoding of failures for crossing a queue or process boundary.
//!
//! `encode` flattens a live `FailureEvent` into a `TransportRecord` holding only
//! strings, numbers, booleans, nulls, arrays, and string-keyed objects. `decode`
//! rebuilds an equivalent event: the kind is reconstructed through a
//! `KindRegistry` when possible and falls back to `GENERIC_KIND` otherwise,
//! keeping message and code. Decoding never fails.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::types::{FailureEvent, FrameArg, SourceLocation, StackFrame};

/// Kind assigned when the original kind cannot be reconstructed.
pub const GENERIC_KIND: &str = "Exception";

/// Placeholder for opaque system handles in frame arguments.
pub const RESOURCE_PLACEHOLDER: &str = "[resource]";

/// Cause links followed when encoding or decoding; deeper links are dropped.
pub const MAX_CAUSE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Transport records
// ---------------------------------------------------------------------------

/// Flat, primitive-only mirror of a `FailureEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRecord {
  pub kind: String,
  #[serde(default)]
  pub message: String,
  /// Non-numeric codes decode as 0.
  #[serde(default, deserialize_with = "lenient_code")]
  pub code: i64,
  #[serde(default)]
  pub file: String,
  #[serde(default)]
  pub line: u32,
  #[serde(default)]
  pub trace: Vec<TransportFrame>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub previous: Option<Box<TransportRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportFrame {
  #[serde(default)]
  pub file: Option<String>,
  #[serde(default)]
  pub line: Option<u32>,
  #[serde(default)]
  pub function: String,
  #[serde(default, rename = "class")]
  pub enclosing_type: Option<String>,
  #[serde(default, rename = "type")]
  pub call_type: Option<String>,
  #[serde(default)]
  pub args: Vec<Value>,
}

fn lenient_code<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
    Value::String(s) => s.trim().parse().unwrap_or(0),
    _ => 0,
  })
}

// ---------------------------------------------------------------------------
// Kind registry
// ---------------------------------------------------------------------------

/// Builds an event of one kind from (message, code). An `Err` means the kind
/// cannot be constructed from those values.
pub type KindConstructor = Arc<dyn Fn(&str, i64) -> Result<FailureEvent, String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
  /// Any well-formed kind identifier is constructible.
  Open,
  /// Only registered kinds are constructible.
  Closed,
}

/// Maps kind identifiers to constructors for type-preserving decode.
#[derive(Clone)]
pub struct KindRegistry {
  mode: RegistryMode,
  constructors: HashMap<String, KindConstructor>,
}

impl KindRegistry {
  pub fn open() -> Self {
    Self {
      mode: RegistryMode::Open,
      constructors: HashMap::new(),
    }
  }

  pub fn closed() -> Self {
    Self {
      mode: RegistryMode::Closed,
      constructors: HashMap::new(),
    }
  }

  pub fn register<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
  where
    F: Fn(&str, i64) -> Result<FailureEvent, String> + Send + Sync + 'static,
  {
    self.constructors.insert(kind.into(), Arc::new(constructor));
    self
  }

  pub fn mode(&self) -> RegistryMode {
    self.mode
  }

  /// Construct an event of `kind`, or `None` when the kind is unknown or its
  /// constructor refuses the input.
  pub fn construct(&self, kind: &str, message: &str, code: i64) -> Option<FailureEvent> {
    if let Some(constructor) = self.constructors.get(kind) {
      return match constructor(message, code) {
        Ok(event) => Some(event),
        Err(reason) => {
          debug!(kind, reason = %reason, "kind constructor rejected input");
          None
        }
      };
    }
    match self.mode {
      RegistryMode::Open if is_valid_kind(kind) => {
        Some(FailureEvent::new(kind, message).with_code(code))
      }
      _ => None,
    }
  }
}

impl Default for KindRegistry {
  fn default() -> Self {
    Self::open()
  }
}

impl fmt::Debug for KindRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut kinds: Vec<&String> = self.constructors.keys().collect();
    kinds.sort();
    f.debug_struct("KindRegistry")
      .field("mode", &self.mode)
      .field("kinds", &kinds)
      .finish()
  }
}

fn is_valid_kind(kind: &str) -> bool {
  !kind.is_empty() && !kind.chars().any(|c| c.is_whitespace() || c.is_control())
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EventCodec {
  registry: KindRegistry,
}

impl EventCodec {
  pub fn new(registry: KindRegistry) -> Self {
    Self { registry }
  }

  pub fn registry(&self) -> &KindRegistry {
    &self.registry
  }

  pub fn encode(&self, event: &FailureEvent) -> TransportRecord {
    encode_at(event, 0)
  }

  pub fn decode(&self, record: &TransportRecord) -> FailureEvent {
    self.decode_at(record, 0)
  }

  fn decode_at(&self, record: &TransportRecord, depth: usize) -> FailureEvent {
    let mut event = match self.registry.construct(&record.kind, &record.message, record.code) {
      Some(event) => event,
      None => {
        debug!(kind = %record.kind, "falling back to generic kind on decode");
        FailureEvent::new(GENERIC_KIND, record.message.clone()).with_code(record.code)
      }
    };

    // The constructed event carries whatever site its constructor gave it;
    // restore the original one.
    if !record.file.is_empty() {
      event.location.file = record.file.clone();
    }
    if record.line > 0 {
      event.location.line = record.line;
    }

    event.frames = record.trace.iter().map(decode_frame).collect();
    event.cause = match &record.previous {
      Some(previous) if depth + 1 < MAX_CAUSE_DEPTH => {
        Some(Box::new(self.decode_at(previous, depth + 1)))
      }
      _ => None,
    };
    event
  }
}

fn encode_at(event: &FailureEvent, depth: usize) -> TransportRecord {
  let SourceLocation { file, line } = &event.location;
  TransportRecord {
    kind: event.kind.clone(),
    message: event.message.clone(),
    code: event.code,
    file: file.clone(),
    line: *line,
    trace: event.frames.iter().map(encode_frame).collect(),
    previous: match &event.cause {
      Some(cause) if depth + 1 < MAX_CAUSE_DEPTH => Some(Box::new(encode_at(cause, depth + 1))),
      _ => None,
    },
  }
}

fn encode_frame(frame: &StackFrame) -> TransportFrame {
  TransportFrame {
    file: frame.file.clone(),
    line: frame.line,
    function: frame.function.clone(),
    enclosing_type: frame.enclosing_type.clone(),
    call_type: frame.call_type.clone(),
    args: frame.args.iter().map(encode_arg).collect(),
  }
}

/// Replace anything that cannot cross a serialization boundary: objects become
/// their type name, resources a placeholder, containers are walked.
fn encode_arg(arg: &FrameArg) -> Value {
  match arg {
    FrameArg::Null => Value::Null,
    FrameArg::Bool(b) => Value::Bool(*b),
    FrameArg::Int(i) => Value::Number((*i).into()),
    // NaN and infinities have no JSON form.
    FrameArg::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
    FrameArg::Str(s) => Value::String(s.clone()),
    FrameArg::List(items) => Value::Array(items.iter().map(encode_arg).collect()),
    FrameArg::Map(entries) => Value::Object(
      entries
        .iter()
        .map(|(k, v)| (k.clone(), encode_arg(v)))
        .collect(),
    ),
    FrameArg::Object { type_name } => Value::String(type_name.clone()),
    FrameArg::Resource => Value::String(RESOURCE_PLACEHOLDER.to_string()),
  }
}

fn decode_frame(frame: &TransportFrame) -> StackFrame {
  StackFrame {
    file: frame.file.clone(),
    line: frame.line,
    function: frame.function.clone(),
    enclosing_type: frame.enclosing_type.clone(),
    call_type: frame.call_type.clone(),
    args: frame.args.iter().map(decode_arg).collect(),
  }
}

fn decode_arg(value: &Value) -> FrameArg {
  match value {
    Value::Null => FrameArg::Null,
    Value::Bool(b) => FrameArg::Bool(*b),
    Value::Number(n) => match n.as_i64() {
      Some(i) => FrameArg::Int(i),
      None => FrameArg::Float(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => FrameArg::Str(s.clone()),
    Value::Array(items) => FrameArg::List(items.iter().map(decode_arg).collect()),
    Value::Object(entries) => FrameArg::Map(
      entries
        .iter()
        .map(|(k, v)| (k.clone(), decode_arg(v)))
        .collect::<BTreeMap<_, _>>(),
    ),
  }
}
