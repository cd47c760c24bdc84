//! Context collectors: ambient metadata attached to a new record.

use serde_json::Value;
use std::env;

use crate::types::ContextMap;

/// Source of string-keyed context for a report.
pub trait ContextCollector: Send + Sync {
  fn collect(&self) -> ContextMap;
}

/// Fixed context, e.g. metadata already gathered by the caller.
#[derive(Debug, Clone, Default)]
pub struct StaticContext(pub ContextMap);

impl ContextCollector for StaticContext {
  fn collect(&self) -> ContextMap {
    self.0.clone()
  }
}

/// Describes the current process: `type = console` plus its command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessContextCollector;

impl ContextCollector for ProcessContextCollector {
  fn collect(&self) -> ContextMap {
    let mut context = ContextMap::new();
    context.insert("type".into(), Value::String("console".into()));
    let command: Vec<String> = env::args().collect();
    if !command.is_empty() {
      context.insert("command".into(), Value::String(command.join(" ")));
    }
    context
  }
}

/// Wraps a collector and adds an `environment` entry.
#[derive(Debug, Clone)]
pub struct EnvironmentContext<C> {
  inner: C,
  environment: String,
}

impl<C: ContextCollector> EnvironmentContext<C> {
  pub fn new(inner: C, environment: impl Into<String>) -> Self {
    Self {
      inner,
      environment: environment.into(),
    }
  }
}

impl<C: ContextCollector> ContextCollector for EnvironmentContext<C> {
  fn collect(&self) -> ContextMap {
    let mut context = self.inner.collect();
    context.insert("environment".into(), Value::String(self.environment.clone()));
    context
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn process_context_is_console() {
    let context = ProcessContextCollector.collect();
    assert_eq!(context.get("type"), Some(&Value::String("console".into())));
  }

  #[test]
  fn environment_wrapper_overrides_entry() {
    let mut base = ContextMap::new();
    base.insert("environment".into(), Value::String("stale".into()));
    base.insert("user".into(), serde_json::json!({"id": 7}));
    let context = EnvironmentContext::new(StaticContext(base), "staging").collect();
    assert_eq!(context.get("environment"), Some(&Value::String("staging".into())));
    assert_eq!(context.get("user"), Some(&serde_json::json!({"id": 7})));
  }
}
