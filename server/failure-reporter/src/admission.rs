//! Fixed-window admission control: per-fingerprint and global report budgets.
//!
//! Each key owns a counter with a 60 second expiry set when the counter is
//! created. A check reads the counter, denies at `max_per_window`, and otherwise
//! increments it. Read and increment are separate store calls, so concurrent
//! checks on one key may admit slightly more than the maximum. The bound is
//! best-effort; a store with an atomic increment-and-compare would tighten it.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::config::AdmissionConfig;
use crate::error::ReporterError;

/// Length of one admission window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Reserved key for the shared budget.
pub const GLOBAL_KEY: &str = "global";

const KEY_PREFIX: &str = "failure_admission:";

// ---------------------------------------------------------------------------
// Counter store port
// ---------------------------------------------------------------------------

/// Shared, TTL-capable key-value counter.
pub trait CounterStore: Send + Sync + Debug {
  fn get(&self, key: &str) -> Result<Option<u64>, ReporterError>;
  fn put(&self, key: &str, value: u64, ttl: Duration) -> Result<(), ReporterError>;
  /// Add one to a live counter and return the new value, keeping its expiry.
  /// Returns `None` without creating anything when the key is absent or expired.
  fn increment(&self, key: &str) -> Result<Option<u64>, ReporterError>;
  fn has(&self, key: &str) -> Result<bool, ReporterError>;
  fn forget(&self, key: &str) -> Result<(), ReporterError>;
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
  value: u64,
  expires_at: Option<Instant>,
}

impl CounterEntry {
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at.map_or(true, |at| now < at)
  }
}

/// In-process counter store backed by DashMap. Expired entries are dropped lazily
/// on access or by `purge_expired`.
#[derive(Debug)]
pub struct MemoryCounterStore {
  entries: DashMap<String, CounterEntry>,
  clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
  pub fn new() -> Self {
    Self::with_clock(Arc::new(SystemClock))
  }

  pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: DashMap::new(),
      clock,
    }
  }

  /// Drop every expired counter; returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    let now = self.clock.now();
    let before = self.entries.len();
    self.entries.retain(|_, entry| entry.is_live(now));
    before - self.entries.len()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn evict_if_expired(&self, key: &str) {
    let now = self.clock.now();
    self.entries.remove_if(key, |_, entry| !entry.is_live(now));
  }
}

impl Default for MemoryCounterStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CounterStore for MemoryCounterStore {
  fn get(&self, key: &str) -> Result<Option<u64>, ReporterError> {
    self.evict_if_expired(key);
    Ok(self.entries.get(key).map(|entry| entry.value))
  }

  fn put(&self, key: &str, value: u64, ttl: Duration) -> Result<(), ReporterError> {
    let expires_at = self.clock.now() + ttl;
    self.entries.insert(
      key.to_string(),
      CounterEntry {
        value,
        expires_at: Some(expires_at),
      },
    );
    Ok(())
  }

  fn increment(&self, key: &str) -> Result<Option<u64>, ReporterError> {
    self.evict_if_expired(key);
    Ok(self.entries.get_mut(key).map(|mut entry| {
      entry.value += 1;
      entry.value
    }))
  }

  fn has(&self, key: &str) -> Result<bool, ReporterError> {
    self.evict_if_expired(key);
    Ok(self.entries.contains_key(key))
  }

  fn forget(&self, key: &str) -> Result<(), ReporterError> {
    self.entries.remove(key);
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// Admission controller
// ---------------------------------------------------------------------------

/// Diagnostics view of the admission settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionSummary {
  pub enabled: bool,
  pub max_per_window: u64,
  pub window_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AdmissionController {
  store: Arc<dyn CounterStore>,
  enabled: bool,
  max_per_window: u64,
}

impl AdmissionController {
  pub fn new(store: Arc<dyn CounterStore>, config: &AdmissionConfig) -> Self {
    Self {
      store,
      enabled: config.enabled,
      max_per_window: config.max_per_window,
    }
  }

  /// Admit one report for `key` (normally a fingerprint) if its window has budget left.
  pub fn allow(&self, key: &str) -> Result<bool, ReporterError> {
    self.check(&counter_key(key))
  }

  /// Admit one report against the shared budget.
  pub fn allow_global(&self) -> Result<bool, ReporterError> {
    self.check(&counter_key(GLOBAL_KEY))
  }

  /// Remaining admissions for `key` in the current window; `u64::MAX` when disabled.
  pub fn remaining_quota(&self, key: &str) -> Result<u64, ReporterError> {
    if !self.enabled {
      return Ok(u64::MAX);
    }
    let current = self.store.get(&counter_key(key))?.unwrap_or(0);
    Ok(self.max_per_window.saturating_sub(current))
  }

  /// Reset the counter for one key.
  pub fn clear(&self, key: &str) -> Result<(), ReporterError> {
    self.store.forget(&counter_key(key))
  }

  /// Reset the global counter only. Per-fingerprint counters are left to expire
  /// with their window; this is not a full reset.
  pub fn clear_global(&self) -> Result<(), ReporterError> {
    self.store.forget(&counter_key(GLOBAL_KEY))
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn max_per_window(&self) -> u64 {
    self.max_per_window
  }

  pub fn summary(&self) -> AdmissionSummary {
    AdmissionSummary {
      enabled: self.enabled,
      max_per_window: self.max_per_window,
      window_secs: WINDOW.as_secs(),
    }
  }

  fn check(&self, key: &str) -> Result<bool, ReporterError> {
    if !self.enabled {
      return Ok(true);
    }

    let current = self.store.get(key)?.unwrap_or(0);
    if current >= self.max_per_window {
      return Ok(false);
    }

    // The key may expire or be cleared between the read and the write; a
    // missing counter always restarts with a full window.
    if self.store.increment(key)?.is_none() {
      self.store.put(key, 1, WINDOW)?;
    }
    Ok(true)
  }
}

fn counter_key(key: &str) -> String {
  format!("{}{}", KEY_PREFIX, key)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;

  fn controller(max: u64) -> (AdmissionController, Arc<MemoryCounterStore>, ManualClock) {
    let clock = ManualClock::default();
    let store = Arc::new(MemoryCounterStore::with_clock(Arc::new(clock.clone())));
    let config = AdmissionConfig {
      enabled: true,
      max_per_window: max,
    };
    (AdmissionController::new(store.clone(), &config), store, clock)
  }

  #[test]
  fn first_n_allowed_then_denied() {
    let (admission, _, _) = controller(3);
    for _ in 0..3 {
      assert!(admission.allow("fp-a").unwrap());
    }
    assert!(!admission.allow("fp-a").unwrap());
  }

  #[test]
  fn global_budget_behaves_the_same() {
    let (admission, _, _) = controller(2);
    assert!(admission.allow_global().unwrap());
    assert!(admission.allow_global().unwrap());
    assert!(!admission.allow_global().unwrap());
  }

  #[test]
  fn denial_does_not_increment() {
    let (admission, store, _) = controller(1);
    assert!(admission.allow("fp-a").unwrap());
    assert!(!admission.allow("fp-a").unwrap());
    assert!(!admission.allow("fp-a").unwrap());
    assert_eq!(store.get("failure_admission:fp-a").unwrap(), Some(1));
  }

  #[test]
  fn keys_have_independent_budgets() {
    let (admission, _, _) = controller(2);
    assert!(admission.allow("fp-a").unwrap());
    assert!(admission.allow("fp-a").unwrap());
    assert!(!admission.allow("fp-a").unwrap());
    assert!(admission.allow("fp-b").unwrap());
    assert!(admission.allow_global().unwrap());
  }

  #[test]
  fn clear_restores_budget() {
    let (admission, _, _) = controller(1);
    assert!(admission.allow("fp-a").unwrap());
    assert!(!admission.allow("fp-a").unwrap());
    admission.clear("fp-a").unwrap();
    assert!(admission.allow("fp-a").unwrap());
  }

  #[test]
  fn window_expiry_resets_counter() {
    let (admission, _, clock) = controller(1);
    assert!(admission.allow("fp-a").unwrap());
    clock.advance(Duration::from_secs(59));
    assert!(!admission.allow("fp-a").unwrap());
    clock.advance(Duration::from_secs(1));
    assert!(admission.allow("fp-a").unwrap());
  }

  #[test]
  fn increments_keep_original_expiry() {
    let (admission, _, clock) = controller(5);
    assert!(admission.allow("fp-a").unwrap());
    clock.advance(Duration::from_secs(30));
    assert!(admission.allow("fp-a").unwrap());
    clock.advance(Duration::from_secs(30));
    assert_eq!(admission.remaining_quota("fp-a").unwrap(), 5);
  }

  #[test]
  fn increment_never_creates_a_counter() {
    let (_, store, clock) = controller(5);
    assert_eq!(store.increment("k").unwrap(), None);
    assert!(!store.has("k").unwrap());

    store.put("k", 1, WINDOW).unwrap();
    assert_eq!(store.increment("k").unwrap(), Some(2));
    clock.advance(WINDOW);
    assert_eq!(store.increment("k").unwrap(), None);
    assert_eq!(store.get("k").unwrap(), None);
  }

  /// Forgets the key right before the second increment, like a concurrent `clear`.
  #[derive(Debug)]
  struct ClearedMidCheck {
    inner: MemoryCounterStore,
    increments: std::sync::atomic::AtomicUsize,
  }

  impl CounterStore for ClearedMidCheck {
    fn get(&self, key: &str) -> Result<Option<u64>, ReporterError> {
      self.inner.get(key)
    }
    fn put(&self, key: &str, value: u64, ttl: Duration) -> Result<(), ReporterError> {
      self.inner.put(key, value, ttl)
    }
    fn increment(&self, key: &str) -> Result<Option<u64>, ReporterError> {
      if self.increments.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 1 {
        self.inner.forget(key)?;
      }
      self.inner.increment(key)
    }
    fn has(&self, key: &str) -> Result<bool, ReporterError> {
      self.inner.has(key)
    }
    fn forget(&self, key: &str) -> Result<(), ReporterError> {
      self.inner.forget(key)
    }
  }

  #[test]
  fn counter_cleared_mid_check_still_expires() {
    let clock = ManualClock::default();
    let store = Arc::new(ClearedMidCheck {
      inner: MemoryCounterStore::with_clock(Arc::new(clock.clone())),
      increments: Default::default(),
    });
    let config = AdmissionConfig {
      enabled: true,
      max_per_window: 2,
    };
    let admission = AdmissionController::new(store, &config);

    assert!(admission.allow_global().unwrap());
    assert!(admission.allow_global().unwrap());
    assert!(admission.allow_global().unwrap());
    assert!(!admission.allow_global().unwrap());

    clock.advance(WINDOW);
    assert!(admission.allow_global().unwrap());
  }

  #[test]
  fn remaining_quota_tracks_admissions() {
    let (admission, _, _) = controller(3);
    assert_eq!(admission.remaining_quota("fp-a").unwrap(), 3);
    for k in 1..=4u64 {
      let _ = admission.allow("fp-a").unwrap();
      assert_eq!(admission.remaining_quota("fp-a").unwrap(), 3u64.saturating_sub(k));
    }
  }

  #[test]
  fn clear_global_leaves_fingerprint_counters() {
    let (admission, _, _) = controller(1);
    assert!(admission.allow_global().unwrap());
    assert!(admission.allow("fp-a").unwrap());
    admission.clear_global().unwrap();
    assert!(admission.allow_global().unwrap());
    assert!(!admission.allow("fp-a").unwrap());
  }

  #[test]
  fn disabled_always_allows() {
    let store = Arc::new(MemoryCounterStore::new());
    let config = AdmissionConfig {
      enabled: false,
      max_per_window: 1,
    };
    let admission = AdmissionController::new(store.clone(), &config);
    for _ in 0..5 {
      assert!(admission.allow("fp-a").unwrap());
      assert!(admission.allow_global().unwrap());
    }
    assert_eq!(admission.remaining_quota("fp-a").unwrap(), u64::MAX);
    assert!(store.is_empty());
  }

  #[test]
  fn purge_drops_expired_counters() {
    let (admission, store, clock) = controller(5);
    admission.allow("fp-a").unwrap();
    admission.allow("fp-b").unwrap();
    clock.advance(WINDOW);
    assert_eq!(store.purge_expired(), 2);
    assert!(store.is_empty());
  }
}
