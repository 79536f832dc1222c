//! Module Runner
//!
//! Runs the metricsets of one module and funnels their events into a single
//! bounded output channel. Each metricset runs in its own Tokio task.
//!
//! # Architecture
//!
//! - [`Wrapper`]: owns the workers of one module and starts them together
//! - [`MetricSetWorker`]: runs one metricset under its declared protocol
//! - [`PushReporterV2`] / [`PushReporter`]: the reporting surface handed to
//!   metricset code
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use harvester::builtin::uptime::UptimeMetricSet;
//! use harvester::mb::BaseModule;
//! use harvester::module::Wrapper;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let module = Arc::new(BaseModule::new("self", Duration::from_secs(10)));
//! let wrapper = Wrapper::builder(module)
//!     .metric_set(Arc::new(UptimeMetricSet::new("self")))
//!     .max_start_delay(Duration::from_secs(2))
//!     .build()?;
//!
//! let done = CancellationToken::new();
//! let mut events = wrapper.start(done.clone());
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod reporter;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::mb::{BeatEvent, EventModifier, MetricSet, Module, Status};
use crate::stats::StatsRegistry;
use crate::telemetry::DATASET_NAMESPACE;

pub use error::WrapperError;
pub use reporter::{PushReporter, PushReporterV2};
pub use worker::MetricSetWorker;

use worker::UnitContext;

/// Capacity of the output channel returned by [`Wrapper::start`].
pub const OUTPUT_CAPACITY: usize = 1;

/// Extra time a probe waits on top of the maximum start delay.
pub const PROBE_GRACE: Duration = Duration::from_secs(5);

/// Builder for a [`Wrapper`].
pub struct WrapperBuilder {
    module: Arc<dyn Module>,
    metric_sets: Vec<Arc<dyn MetricSet>>,
    max_start_delay: Duration,
    modifiers: Vec<EventModifier>,
    stats: Option<StatsRegistry>,
}

impl WrapperBuilder {
    /// Start building a wrapper for `module`.
    pub fn new(module: Arc<dyn Module>) -> Self {
        Self {
            module,
            metric_sets: Vec::new(),
            max_start_delay: Duration::ZERO,
            modifiers: Vec::new(),
            stats: None,
        }
    }

    /// Add a metricset.
    pub fn metric_set(mut self, metric_set: Arc<dyn MetricSet>) -> Self {
        self.metric_sets.push(metric_set);
        self
    }

    /// Add several metricsets, keeping their order.
    pub fn metric_sets(mut self, metric_sets: impl IntoIterator<Item = Arc<dyn MetricSet>>) -> Self {
        self.metric_sets.extend(metric_sets);
        self
    }

    /// Spread metricset start times uniformly over `[0, delay)`.
    ///
    /// Zero (the default) starts every metricset immediately.
    pub fn max_start_delay(mut self, delay: Duration) -> Self {
        self.max_start_delay = delay;
        self
    }

    /// Append an event modifier. Modifiers run in insertion order.
    pub fn event_modifier(mut self, modifier: EventModifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Append several event modifiers.
    pub fn event_modifiers(mut self, modifiers: impl IntoIterator<Item = EventModifier>) -> Self {
        self.modifiers.extend(modifiers);
        self
    }

    /// Use a shared stats registry instead of a private one.
    pub fn stats_registry(mut self, stats: StatsRegistry) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Build the wrapper, acquiring a stats entry per metricset.
    ///
    /// # Errors
    /// Returns [`WrapperError::NoMetricSets`] for an empty metricset list and
    /// [`WrapperError::ZeroPeriod`] when a polled metricset belongs to a
    /// module with a zero period.
    pub fn build(self) -> Result<Wrapper, WrapperError> {
        let module_name = self.module.name().to_owned();
        if self.metric_sets.is_empty() {
            return Err(WrapperError::NoMetricSets {
                module: module_name,
            });
        }

        if self.module.period().is_zero()
            && let Some(polled) = self
                .metric_sets
                .iter()
                .find(|&ms| Arc::clone(ms).capability().is_periodic())
        {
            return Err(WrapperError::ZeroPeriod {
                module: module_name,
                metric_set: polled.base().name().to_owned(),
            });
        }

        let stats = self.stats.unwrap_or_default();
        let unit = Arc::new(UnitContext::new(
            self.module,
            self.max_start_delay,
            self.modifiers,
        ));

        let workers = self
            .metric_sets
            .into_iter()
            .map(|metric_set| {
                let handle = stats.acquire(StatsRegistry::key(&module_name, metric_set.base().name()));
                Arc::new(MetricSetWorker::new(metric_set, Arc::clone(&unit), handle))
            })
            .collect();

        Ok(Wrapper {
            unit,
            workers,
            stats,
        })
    }
}

/// Outcome of probing one metricset with [`Wrapper::probe`].
#[derive(Debug)]
pub struct ProbeOutcome {
    /// Metricset name.
    pub metric_set: String,
    /// Metricset host.
    pub host: String,
    /// First reported event, or why there was none.
    pub result: Result<BeatEvent, WrapperError>,
}

/// A module and the workers of its metricsets.
pub struct Wrapper {
    unit: Arc<UnitContext>,
    workers: Vec<Arc<MetricSetWorker>>,
    stats: StatsRegistry,
}

impl Wrapper {
    /// Start building a wrapper for `module`.
    pub fn builder(module: Arc<dyn Module>) -> WrapperBuilder {
        WrapperBuilder::new(module)
    }

    /// Wrapper running a single metricset with default options.
    pub fn for_metric_set(
        module: Arc<dyn Module>,
        metric_set: Arc<dyn MetricSet>,
    ) -> Result<Self, WrapperError> {
        WrapperBuilder::new(module).metric_set(metric_set).build()
    }

    /// Module name.
    pub fn name(&self) -> &str {
        self.unit.module.name()
    }

    /// The wrapped module.
    pub fn module(&self) -> &Arc<dyn Module> {
        &self.unit.module
    }

    /// Workers in metricset order.
    pub fn metric_sets(&self) -> &[Arc<MetricSetWorker>] {
        &self.workers
    }

    /// Maximum start delay applied to each worker.
    pub fn max_start_delay(&self) -> Duration {
        self.unit.max_start_delay
    }

    /// Stats registry the workers report into.
    pub fn stats_registry(&self) -> &StatsRegistry {
        &self.stats
    }

    /// Start one task per metricset and return the shared output channel.
    ///
    /// Workers run until `done` is cancelled (or, for push metricsets, until
    /// their own loop returns). The channel closes once every worker has
    /// stopped. It holds a single event and must be drained continuously,
    /// otherwise every worker blocks on its next report.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn start(self, done: CancellationToken) -> mpsc::Receiver<BeatEvent> {
        tracing::debug!(module = %self.name(), "Starting {self}");

        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);
        let telemetry = self.stats.telemetry().clone();
        let mut tasks = JoinSet::new();

        for worker in &self.workers {
            let worker = Arc::clone(worker);
            let module = Arc::clone(&self.unit.module);
            let (done, out, telemetry) = (done.clone(), tx.clone(), telemetry.clone());

            tasks.spawn(async move {
                let metrics_path = worker.id().to_owned();
                telemetry.add(DATASET_NAMESPACE, &metrics_path, worker.metrics());
                worker.mark_started();

                module.update_status(
                    Status::Starting,
                    &format!("{}/{} is starting", module.name(), worker.name()),
                );
                worker.run(done, out).await;

                worker.close().await;
                drop(worker.take_stats_handle());
                telemetry.remove(DATASET_NAMESPACE, &metrics_path);
            });
        }

        let description = self.to_string();
        let module_name = self.name().to_owned();
        tokio::spawn(async move {
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(module = %module_name, error = %err, "Metricset task failed");
                }
            }
            // Last sender: dropping it closes the output channel.
            drop(tx);
            tracing::debug!(module = %module_name, "Stopped {description}");
        });

        rx
    }

    /// Run every metricset until it reports one event.
    ///
    /// Each metricset gets `max_start_delay` plus [`PROBE_GRACE`] to report.
    pub async fn probe(&self) -> Vec<ProbeOutcome> {
        let timeout = self.unit.max_start_delay + PROBE_GRACE;
        let mut outcomes = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            outcomes.push(ProbeOutcome {
                metric_set: worker.name().to_owned(),
                host: worker.host().to_owned(),
                result: worker.probe(timeout).await,
            });
        }
        outcomes
    }
}

impl std::fmt::Display for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Wrapper[name={}, len(metricSetWrappers)={}]",
            self.name(),
            self.workers.len()
        )
    }
}

impl std::fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapper")
            .field("name", &self.name())
            .field("metric_sets", &self.workers)
            .field("max_start_delay", &self.unit.max_start_delay)
            .finish_non_exhaustive()
    }
}
