//! Core types for the failure reporter (live failure model + JSON contracts).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Arbitrary nested string-keyed data attached to a record.
pub type ContextMap = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Live failure model
// ---------------------------------------------------------------------------

/// Where a failure was raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SourceLocation {
  pub file: String,
  pub line: u32,
}

/// A frame argument as captured at the failure site. Not every variant can
/// cross a serialization boundary; see `codec::EventCodec::encode`.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameArg {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  List(Vec<FrameArg>),
  Map(BTreeMap<String, FrameArg>),
  /// A structured value, known only by its type name.
  Object { type_name: String },
  /// An opaque system handle (socket, file descriptor, stream).
  Resource,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackFrame {
  pub file: Option<String>,
  pub line: Option<u32>,
  pub function: String,
  pub enclosing_type: Option<String>,
  /// `->` for instance calls, `::` for static calls.
  pub call_type: Option<String>,
  pub args: Vec<FrameArg>,
}

impl StackFrame {
  pub fn new(function: impl Into<String>) -> Self {
    Self {
      function: function.into(),
      ..Self::default()
    }
  }

  pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
    self.file = Some(file.into());
    self.line = Some(line);
    self
  }

  pub fn method(mut self, enclosing_type: impl Into<String>, call_type: impl Into<String>) -> Self {
    self.enclosing_type = Some(enclosing_type.into());
    self.call_type = Some(call_type.into());
    self
  }

  pub fn with_args(mut self, args: Vec<FrameArg>) -> Self {
    self.args = args;
    self
  }
}

/// One captured failure. Immutable once handed to the pipeline; the cause
/// chain is owned, so it is always finite and acyclic.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureEvent {
  pub kind: String,
  pub message: String,
  pub code: i64,
  pub location: SourceLocation,
  pub frames: Vec<StackFrame>,
  pub cause: Option<Box<FailureEvent>>,
}

impl FailureEvent {
  pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      message: message.into(),
      code: 0,
      location: SourceLocation::default(),
      frames: Vec::new(),
      cause: None,
    }
  }

  pub fn with_code(mut self, code: i64) -> Self {
    self.code = code;
    self
  }

  pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
    self.location = SourceLocation {
      file: file.into(),
      line,
    };
    self
  }

  pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
    self.frames = frames;
    self
  }

  pub fn caused_by(mut self, cause: FailureEvent) -> Self {
    self.cause = Some(Box::new(cause));
    self
  }

  pub fn file(&self) -> &str {
    &self.location.file
  }

  pub fn line(&self) -> u32 {
    self.location.line
  }

  /// Last path segment of the kind identifier (`App\Errors\Timeout` -> `Timeout`,
  /// `std::io::Error` -> `Error`).
  pub fn short_kind(&self) -> &str {
    self
      .kind
      .rsplit(['\\', ':', '.'])
      .find(|segment| !segment.is_empty())
      .unwrap_or(&self.kind)
  }

  /// Number of links below this event in the cause chain.
  pub fn cause_depth(&self) -> usize {
    let mut depth = 0;
    let mut current = self.cause.as_deref();
    while let Some(cause) = current {
      depth += 1;
      current = cause.cause.as_deref();
    }
    depth
  }

  /// Human-readable stack trace: `#0 file(line): Type->function()` ... `#N {main}`.
  pub fn trace_string(&self) -> String {
    let mut out = String::new();
    for (i, frame) in self.frames.iter().enumerate() {
      let site = match (&frame.file, frame.line) {
        (Some(file), Some(line)) => format!("{}({})", file, line),
        (Some(file), None) => file.clone(),
        _ => "[internal function]".to_string(),
      };
      let owner = match (&frame.enclosing_type, &frame.call_type) {
        (Some(ty), Some(call)) => format!("{}{}", ty, call),
        (Some(ty), None) => format!("{}::", ty),
        _ => String::new(),
      };
      out.push_str(&format!("#{} {}: {}{}()\n", i, site, owner, frame.function));
    }
    out.push_str(&format!("#{} {{main}}", self.frames.len()));
    out
  }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Full SHA-256 hex digest identifying one failure group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  /// Display length of `short()`.
  pub const SHORT_LEN: usize = 16;

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Shortened form for presentation only; never compare on this.
  pub fn short(&self) -> &str {
    let end = self.0.len().min(Self::SHORT_LEN);
    &self.0[..end]
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub line: Option<usize>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      line: None,
    }
  }

  pub fn at_line(mut self, line: usize) -> Self {
    self.line = Some(line);
    self
  }
}
