//! Shared, reference-counted metricset stats.
//!
//! Every running instance of the same logical metricset (for example one
//! instance per configured host) reports into one [`Stats`] entry keyed by
//! `<module>.<metricset>`. The entry lives as long as at least one
//! [`StatsHandle`] for its key is alive, and its counters are visible in the
//! [`TelemetryRegistry`] under [`STATS_NAMESPACE`] for exactly that long.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::telemetry::{MetricSource, STATS_NAMESPACE, TelemetryRegistry};

/// Counter name for successful events.
pub const SUCCESS_KEY: &str = "success";
/// Counter name for error events.
pub const FAILURES_KEY: &str = "failures";
/// Counter name for published events.
pub const EVENTS_KEY: &str = "events";

/// Success, failure and publish counters.
///
/// Increments are lock-free and never touch the registry lock.
#[derive(Debug)]
pub struct Stats {
    key: String,
    success: AtomicU64,
    failures: AtomicU64,
    events: AtomicU64,
}

impl Stats {
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            success: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            events: AtomicU64::new(0),
        }
    }

    /// Key this entry is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Total events reported without an error.
    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    /// Total events reported with an error.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Total events accepted onto the output stream.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub(crate) fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
}

impl MetricSource for Stats {
    fn snapshot(&self) -> Value {
        json!({
            SUCCESS_KEY: self.success(),
            FAILURES_KEY: self.failures(),
            EVENTS_KEY: self.events(),
        })
    }
}

struct Entry {
    stats: Arc<Stats>,
    refs: usize,
}

struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    telemetry: TelemetryRegistry,
}

/// Registry of [`Stats`] entries.
///
/// Cloning yields another handle to the same registry. Tests can build
/// isolated registries with [`StatsRegistry::default`].
#[derive(Clone)]
pub struct StatsRegistry {
    inner: Arc<Inner>,
}

impl StatsRegistry {
    /// Create a registry that publishes its entries into `telemetry`.
    pub fn new(telemetry: TelemetryRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                telemetry,
            }),
        }
    }

    /// Stats key for a module/metricset pair.
    pub fn key(module: &str, metric_set: &str) -> String {
        format!("{module}.{metric_set}")
    }

    /// Telemetry registry the entries are published into.
    pub fn telemetry(&self) -> &TelemetryRegistry {
        &self.inner.telemetry
    }

    /// Get the entry for `key`, creating and registering it if absent.
    pub fn acquire(&self, key: impl Into<String>) -> StatsHandle {
        let key = key.into();
        let mut entries = self.inner.entries.lock();

        if let Some(entry) = entries.get_mut(&key) {
            entry.refs += 1;
            return StatsHandle {
                registry: self.clone(),
                stats: Arc::clone(&entry.stats),
            };
        }

        let stats = Arc::new(Stats::new(key.clone()));
        self.inner
            .telemetry
            .add(STATS_NAMESPACE, &key, Arc::clone(&stats) as Arc<dyn MetricSource>);
        entries.insert(
            key,
            Entry {
                stats: Arc::clone(&stats),
                refs: 1,
            },
        );

        StatsHandle {
            registry: self.clone(),
            stats,
        }
    }

    /// Release a handle obtained from [`acquire`](Self::acquire).
    ///
    /// Equivalent to dropping it.
    pub fn release(&self, handle: StatsHandle) {
        debug_assert!(
            Arc::ptr_eq(&self.inner, &handle.registry.inner),
            "stats handle released into a foreign registry"
        );
        drop(handle);
    }

    /// Number of live handles for `key`, zero when no entry exists.
    pub fn ref_count(&self, key: &str) -> usize {
        self.inner
            .entries
            .lock()
            .get(key)
            .map_or(0, |entry| entry.refs)
    }

    /// Whether an entry for `key` exists.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release_key(&self, key: &str) {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            tracing::warn!(key, "Released stats entry that is not registered");
            return;
        };

        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }

        entries.remove(key);
        self.inner.telemetry.remove(STATS_NAMESPACE, key);
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new(TelemetryRegistry::new())
    }
}

impl std::fmt::Debug for StatsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsRegistry")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// A live reference to a [`Stats`] entry. Dropping it releases the reference.
pub struct StatsHandle {
    registry: StatsRegistry,
    stats: Arc<Stats>,
}

impl StatsHandle {
    /// Shared counters behind this handle.
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }
}

impl std::ops::Deref for StatsHandle {
    type Target = Stats;

    fn deref(&self) -> &Stats {
        &self.stats
    }
}

impl Drop for StatsHandle {
    fn drop(&mut self) {
        self.registry.release_key(self.stats.key());
    }
}

impl std::fmt::Debug for StatsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsHandle")
            .field("key", &self.stats.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_entry() {
        let registry = StatsRegistry::default();
        let handle = registry.acquire("system.cpu");

        assert_eq!(handle.key(), "system.cpu");
        assert_eq!(registry.ref_count("system.cpu"), 1);
        assert!(registry.telemetry().contains(STATS_NAMESPACE, "system.cpu"));
        assert_eq!(handle.success(), 0);
        assert_eq!(handle.failures(), 0);
        assert_eq!(handle.events(), 0);
    }

    #[test]
    fn test_acquire_shares_entry_by_key() {
        let registry = StatsRegistry::default();
        let first = registry.acquire("system.cpu");
        let second = registry.acquire("system.cpu");

        assert!(Arc::ptr_eq(first.stats(), second.stats()));
        assert_eq!(registry.ref_count("system.cpu"), 2);
        assert_eq!(registry.len(), 1);

        first.record_success();
        assert_eq!(second.success(), 1);
    }

    #[test]
    fn test_release_removes_entry_at_zero() {
        let registry = StatsRegistry::default();
        let first = registry.acquire("system.cpu");
        let second = registry.acquire("system.cpu");

        registry.release(first);
        assert!(registry.contains("system.cpu"));
        assert!(registry.telemetry().contains(STATS_NAMESPACE, "system.cpu"));

        registry.release(second);
        assert!(!registry.contains("system.cpu"));
        assert!(!registry.telemetry().contains(STATS_NAMESPACE, "system.cpu"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reacquire_after_release_starts_fresh() {
        let registry = StatsRegistry::default();
        let handle = registry.acquire("system.cpu");
        handle.record_failure();
        drop(handle);

        let handle = registry.acquire("system.cpu");
        assert_eq!(handle.failures(), 0);
        assert_eq!(registry.ref_count("system.cpu"), 1);
    }

    #[test]
    fn test_concurrent_acquire_release_leaves_registry_empty() {
        let registry = StatsRegistry::default();

        std::thread::scope(|scope| {
            for _ in 0..16 {
                let registry = registry.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        let handle = registry.acquire("redis.info");
                        handle.record_event();
                        registry.release(handle);
                    }
                });
            }
        });

        assert!(!registry.contains("redis.info"));
        assert!(registry.telemetry().paths(STATS_NAMESPACE).is_empty());
    }

    #[test]
    fn test_concurrent_holders_share_one_entry() {
        let registry = StatsRegistry::default();
        let handles: Vec<_> = std::thread::scope(|scope| {
            let spawned: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.acquire("redis.info")))
                .collect();
            spawned.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ref_count("redis.info"), 8);

        drop(handles);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_reports_counters() {
        let registry = StatsRegistry::default();
        let handle = registry.acquire("system.load");
        handle.record_success();
        handle.record_success();
        handle.record_failure();
        handle.record_event();

        let snapshot = registry.telemetry().snapshot(STATS_NAMESPACE);
        assert_eq!(
            snapshot["system.load"],
            json!({"success": 2, "failures": 1, "events": 1})
        );
    }
}
