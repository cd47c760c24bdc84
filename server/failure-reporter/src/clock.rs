//! Time source used for counter expiry.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Port for obtaining the current instant.
pub trait Clock: Send + Sync + Debug {
  fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
  current: Arc<Mutex<Instant>>,
}

impl ManualClock {
  pub fn new(start: Instant) -> Self {
    Self {
      current: Arc::new(Mutex::new(start)),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
    *current += by;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Instant::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    *self.current.lock().unwrap_or_else(|e| e.into_inner())
  }
}
