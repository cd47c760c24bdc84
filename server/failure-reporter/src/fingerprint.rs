//! Stable fingerprint computation for grouping failures into records.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::normalize::normalize_message;
use crate::types::{FailureEvent, Fingerprint};

const DELIMITER: &str = "|";

/// Compute the fingerprint of a failure.
///
/// Key components: kind + normalized message + file + line, joined with `|` and
/// hashed with SHA-256. The full hex digest is the grouping key.
pub fn generate(event: &FailureEvent) -> Fingerprint {
  let line = event.line().to_string();
  let message = normalize_message(&event.message);
  let joined = [event.kind.as_str(), message.as_str(), event.file(), line.as_str()].join(DELIMITER);

  Fingerprint(hex::encode(Sha256::digest(joined.as_bytes())))
}

/// Fingerprint plus the identity fields it was derived from, for display and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintData {
  pub fingerprint: String,
  pub short: String,
  pub kind: String,
  pub message: String,
  pub file: String,
  pub line: u32,
}

impl FingerprintData {
  pub fn from_event(event: &FailureEvent) -> Self {
    let fp = generate(event);
    Self {
      short: fp.short().to_string(),
      fingerprint: fp.0,
      kind: event.kind.clone(),
      message: event.message.clone(),
      file: event.file().to_string(),
      line: event.line(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_event(kind: &str, message: &str, file: &str, line: u32) -> FailureEvent {
    FailureEvent::new(kind, message).at(file, line)
  }

  #[test]
  fn same_input_same_fingerprint() {
    let e1 = make_event("QueryError", "table missing", "src/db.rs", 10);
    let e2 = make_event("QueryError", "table missing", "src/db.rs", 10);
    assert_eq!(generate(&e1), generate(&e2));
  }

  #[test]
  fn variable_data_does_not_split_groups() {
    let pairs = [
      (
        "lookup 550e8400-e29b-41d4-a716-446655440000 failed",
        "lookup 6ba7b810-9dad-11d1-80b4-00c04fd430c8 failed",
      ),
      ("user 1234567 not found", "user 7654321 not found"),
      ("stale at 2025-01-15T10:30:00", "stale at 2024-12-01 08:00:59"),
      ("no account for a@example.com", "no account for b.c@test.org"),
      ("peer 10.0.0.1 reset", "peer 192.168.1.254 reset"),
    ];
    for (a, b) in pairs {
      let e1 = make_event("LookupError", a, "src/x.rs", 3);
      let e2 = make_event("LookupError", b, "src/x.rs", 3);
      assert_eq!(generate(&e1), generate(&e2), "{} vs {}", a, b);
    }
  }

  #[test]
  fn different_kind_different_fingerprint() {
    let e1 = make_event("TypeError", "boom", "src/a.rs", 1);
    let e2 = make_event("ValueError", "boom", "src/a.rs", 1);
    assert_ne!(generate(&e1), generate(&e2));
  }

  #[test]
  fn different_file_different_fingerprint() {
    let e1 = make_event("TypeError", "boom", "src/a.rs", 1);
    let e2 = make_event("TypeError", "boom", "src/b.rs", 1);
    assert_ne!(generate(&e1), generate(&e2));
  }

  #[test]
  fn different_line_different_fingerprint() {
    let e1 = make_event("TypeError", "boom", "src/a.rs", 1);
    let e2 = make_event("TypeError", "boom", "src/a.rs", 2);
    assert_ne!(generate(&e1), generate(&e2));
  }

  #[test]
  fn fingerprint_is_64_hex_chars() {
    let fp = generate(&make_event("TypeError", "boom", "src/a.rs", 1));
    assert_eq!(fp.0.len(), 64);
    assert!(fp.0.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn matches_sha256_of_joined_components() {
    let fp = generate(&make_event("E", "user {id}", "f.rs", 7));
    let expected = hex::encode(Sha256::digest(b"E|user {id}|f.rs|7"));
    assert_eq!(fp.0, expected);
  }

  #[test]
  fn fingerprint_data_carries_identity() {
    let data = FingerprintData::from_event(&make_event("E", "user 123456", "f.rs", 7));
    assert_eq!(data.short.len(), 16);
    assert!(data.fingerprint.starts_with(&data.short));
    assert_eq!(data.message, "user 123456");
    assert_eq!(data.line, 7);
  }
}
