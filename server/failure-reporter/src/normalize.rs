//! Normalize failure messages so occurrences that differ only in variable data group together.

use regex::Regex;
use std::sync::LazyLock;

/// Substitution rules, applied in order. Each match is replaced by a fixed placeholder.
static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
  [
    (
      r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
      "{uuid}",
    ),
    (r"(?i)\b\d{5,}\b", "{id}"),
    (r"(?i)\d{4}-\d{2}-\d{2}[T\s]\d{2}:\d{2}:\d{2}", "{timestamp}"),
    (r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}", "{email}"),
    (r"(?i)\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}", "{ip}"),
  ]
  .into_iter()
  .map(|(pattern, placeholder)| {
    (
      Regex::new(pattern).expect("Invalid normalization pattern"),
      placeholder,
    )
  })
  .collect()
});

/// Replace UUIDs, long numeric ids, ISO date-times, emails, and IPv4 addresses
/// with placeholder tokens.
pub fn normalize_message(message: &str) -> String {
  let mut out = message.to_string();
  for (pattern, placeholder) in RULES.iter() {
    if pattern.is_match(&out) {
      out = pattern.replace_all(&out, *placeholder).into_owned();
    }
  }
  out
}
