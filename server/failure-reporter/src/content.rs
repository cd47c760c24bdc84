//! Content blocks attached to newly created records.
//!
//! The record store treats blocks as opaque payloads; `BlockRenderer` is the
//! stock renderer (message, capped stack trace, context).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ContextMap, FailureEvent};

/// Longest stack trace text placed in a code block.
pub const MAX_TRACE_CHARS: usize = 2000;

const TRUNCATION_MARKER: &str = "\n\n... (truncated)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum ContentBlock {
  Heading2(String),
  Heading3(String),
  Paragraph(String),
  Code(String),
  BulletedListItem(String),
  Divider,
}

/// Renders a failure plus its context into blocks for a new record.
pub trait ContentRenderer: Send + Sync {
  fn render(&self, event: &FailureEvent, context: &ContextMap) -> Vec<ContentBlock>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BlockRenderer;

impl ContentRenderer for BlockRenderer {
  fn render(&self, event: &FailureEvent, context: &ContextMap) -> Vec<ContentBlock> {
    let message = if event.message.is_empty() {
      "No message".to_string()
    } else {
      event.message.clone()
    };

    let mut blocks = vec![
      ContentBlock::Heading2("Exception Message".into()),
      ContentBlock::Paragraph(message),
      ContentBlock::Divider,
      ContentBlock::Heading2("Stack Trace".into()),
      ContentBlock::Code(cap_trace(&event.trace_string())),
      ContentBlock::Divider,
    ];

    let context_blocks = format_context(context);
    if !context_blocks.is_empty() {
      blocks.push(ContentBlock::Heading2("Context".into()));
      blocks.extend(context_blocks);
    }
    blocks
  }
}

/// Cap a trace at `MAX_TRACE_CHARS`, keeping the head and appending a marker.
pub fn cap_trace(trace: &str) -> String {
  if trace.chars().count() <= MAX_TRACE_CHARS {
    return trace.to_string();
  }
  let keep = MAX_TRACE_CHARS - 50;
  let mut out: String = trace.chars().take(keep).collect();
  out.push_str(TRUNCATION_MARKER);
  out
}

/// Mapping and list categories become a heading plus `Key: value` bullets (lists
/// keyed by index); scalars become a single bullet. Empty categories are skipped.
pub fn format_context(context: &ContextMap) -> Vec<ContentBlock> {
  let mut blocks = Vec::new();
  for (category, data) in context {
    match data {
      Value::Object(entries) => {
        if entries.is_empty() {
          continue;
        }
        blocks.push(ContentBlock::Heading3(capitalize(category)));
        for (key, value) in entries {
          blocks.push(bullet(&humanize(key), value));
        }
      }
      Value::Array(items) => {
        if items.is_empty() {
          continue;
        }
        blocks.push(ContentBlock::Heading3(capitalize(category)));
        for (index, value) in items.iter().enumerate() {
          blocks.push(bullet(&index.to_string(), value));
        }
      }
      scalar => blocks.push(bullet(&humanize(category), scalar)),
    }
  }
  blocks
}

fn bullet(label: &str, value: &Value) -> ContentBlock {
  ContentBlock::BulletedListItem(format!("{}: {}", label, display_value(value)))
}

fn humanize(key: &str) -> String {
  capitalize(&key.replace('_', " "))
}

fn capitalize(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

fn display_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn context(value: Value) -> ContextMap {
    match value {
      Value::Object(map) => map,
      _ => panic!("context must be an object"),
    }
  }

  #[test]
  fn formats_categories_and_scalars() {
    let blocks = format_context(&context(json!({
      "request": {"method": "GET", "user_agent": "curl/8"},
      "headers": {},
      "environment": "prod"
    })));
    assert_eq!(
      blocks,
      vec![
        ContentBlock::BulletedListItem("Environment: prod".into()),
        ContentBlock::Heading3("Request".into()),
        ContentBlock::BulletedListItem("Method: GET".into()),
        ContentBlock::BulletedListItem("User agent: curl/8".into()),
      ]
    );
  }

  #[test]
  fn lists_render_as_indexed_categories() {
    let blocks = format_context(&context(json!({
      "tags": ["billing", "retry"],
      "queue": []
    })));
    assert_eq!(
      blocks,
      vec![
        ContentBlock::Heading3("Tags".into()),
        ContentBlock::BulletedListItem("0: billing".into()),
        ContentBlock::BulletedListItem("1: retry".into()),
      ]
    );
  }

  #[test]
  fn renders_message_trace_and_context() {
    let event = FailureEvent::new("E", "");
    let blocks = BlockRenderer.render(&event, &context(json!({"type": "console"})));
    assert_eq!(blocks[1], ContentBlock::Paragraph("No message".into()));
    assert_eq!(blocks[4], ContentBlock::Code("#0 {main}".into()));
    assert_eq!(blocks[6], ContentBlock::Heading2("Context".into()));
    assert_eq!(blocks.len(), 8);
  }

  #[test]
  fn no_context_section_when_empty() {
    let blocks = BlockRenderer.render(&FailureEvent::new("E", "m"), &ContextMap::new());
    assert_eq!(blocks.len(), 6);
    assert_eq!(blocks.last(), Some(&ContentBlock::Divider));
  }

  #[test]
  fn long_traces_are_capped() {
    let trace = "x".repeat(5000);
    let capped = cap_trace(&trace);
    assert!(capped.chars().count() <= MAX_TRACE_CHARS);
    assert!(capped.ends_with("... (truncated)"));
    assert_eq!(cap_trace("short"), "short");
  }
}
