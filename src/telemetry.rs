//! In-process telemetry registry.
//!
//! Groups named metric sources by namespace so an external observer can take
//! JSON snapshots of them. Running metricset workers register their live
//! counters under [`DATASET_NAMESPACE`]; the stats registry registers the
//! shared per-(module, metricset) counters under [`STATS_NAMESPACE`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Namespace for per-worker metrics, keyed by metricset id.
pub const DATASET_NAMESPACE: &str = "dataset";

/// Namespace for shared stats, keyed by `<module>.<metricset>`.
pub const STATS_NAMESPACE: &str = "stats";

/// A source of metric values that can be rendered as JSON.
pub trait MetricSource: Send + Sync + 'static {
    /// Current values of this source.
    fn snapshot(&self) -> Value;
}

type Namespace = BTreeMap<String, Arc<dyn MetricSource>>;

/// Registry of metric sources, cheap to clone and shared by reference.
#[derive(Clone, Default)]
pub struct TelemetryRegistry {
    namespaces: Arc<RwLock<BTreeMap<String, Namespace>>>,
}

impl TelemetryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under `namespace`/`path`.
    ///
    /// An existing source at the same path is replaced.
    pub fn add(&self, namespace: &str, path: &str, source: Arc<dyn MetricSource>) {
        let replaced = self
            .namespaces
            .write()
            .entry(namespace.to_owned())
            .or_default()
            .insert(path.to_owned(), source)
            .is_some();

        if replaced {
            tracing::warn!(namespace, path, "Replaced existing telemetry source");
        }
    }

    /// Remove the source at `namespace`/`path`. Returns whether one was present.
    pub fn remove(&self, namespace: &str, path: &str) -> bool {
        let mut namespaces = self.namespaces.write();
        let Some(sources) = namespaces.get_mut(namespace) else {
            return false;
        };
        let removed = sources.remove(path).is_some();
        if sources.is_empty() {
            namespaces.remove(namespace);
        }
        removed
    }

    /// Whether a source is registered at `namespace`/`path`.
    pub fn contains(&self, namespace: &str, path: &str) -> bool {
        self.namespaces
            .read()
            .get(namespace)
            .is_some_and(|sources| sources.contains_key(path))
    }

    /// Registered paths in `namespace`, sorted.
    pub fn paths(&self, namespace: &str) -> Vec<String> {
        self.namespaces
            .read()
            .get(namespace)
            .map(|sources| sources.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot every source in `namespace` as a `{path: values}` object.
    pub fn snapshot(&self, namespace: &str) -> Value {
        // Clone the sources out so snapshots run without the registry lock.
        let sources: Vec<(String, Arc<dyn MetricSource>)> = self
            .namespaces
            .read()
            .get(namespace)
            .map(|sources| {
                sources
                    .iter()
                    .map(|(path, source)| (path.clone(), Arc::clone(source)))
                    .collect()
            })
            .unwrap_or_default();

        let values: Map<String, Value> = sources
            .into_iter()
            .map(|(path, source)| (path, source.snapshot()))
            .collect();
        Value::Object(values)
    }
}

impl std::fmt::Debug for TelemetryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let namespaces = self.namespaces.read();
        f.debug_struct("TelemetryRegistry")
            .field(
                "namespaces",
                &namespaces
                    .iter()
                    .map(|(name, sources)| (name.as_str(), sources.len()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
