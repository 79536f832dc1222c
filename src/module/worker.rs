//! Metricset worker: runs one metricset under its declared protocol.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::WrapperError;
use super::reporter::EventReporter;
use crate::mb::{
    BaseMetricSet, BeatEvent, BoxError, Capability, EventModifier, FetchContext, Fetcher,
    MetricSet, Module, Pusher, Status,
};
use crate::stats::{Stats, StatsHandle};
use crate::telemetry::MetricSource;

/// Settings shared by every worker of one module.
pub(crate) struct UnitContext {
    pub(crate) module: Arc<dyn Module>,
    pub(crate) max_start_delay: Duration,
    pub(crate) modifiers: Vec<EventModifier>,
}

impl UnitContext {
    pub(crate) fn new(
        module: Arc<dyn Module>,
        max_start_delay: Duration,
        modifiers: Vec<EventModifier>,
    ) -> Self {
        Self {
            module,
            max_start_delay,
            modifiers,
        }
    }
}

/// Live per-instance counters, published while the worker runs.
pub(crate) struct WorkerMetrics {
    counters: Stats,
    start_time: OnceLock<DateTime<Utc>>,
}

impl MetricSource for WorkerMetrics {
    fn snapshot(&self) -> Value {
        json!({
            "success": self.counters.success(),
            "failures": self.counters.failures(),
            "events": self.counters.events(),
            "starttime": self.start_time.get().map(DateTime::to_rfc3339),
        })
    }
}

/// Runs a single metricset instance.
///
/// The worker caches the metricset's [`Capability`] at construction, holds a
/// shared [`Stats`] entry for its module/metricset pair and remembers whether
/// it is running under a polling protocol.
pub struct MetricSetWorker {
    metric_set: Arc<dyn MetricSet>,
    capability: Capability,
    unit: Arc<UnitContext>,
    stats: Arc<Stats>,
    stats_handle: Mutex<Option<StatsHandle>>,
    metrics: Arc<WorkerMetrics>,
    periodic: AtomicBool,
}

impl MetricSetWorker {
    pub(crate) fn new(
        metric_set: Arc<dyn MetricSet>,
        unit: Arc<UnitContext>,
        stats: StatsHandle,
    ) -> Self {
        let capability = Arc::clone(&metric_set).capability();
        let metrics = Arc::new(WorkerMetrics {
            counters: Stats::new(metric_set.base().id()),
            start_time: OnceLock::new(),
        });

        Self {
            metric_set,
            capability,
            unit,
            stats: Arc::clone(stats.stats()),
            stats_handle: Mutex::new(Some(stats)),
            metrics,
            periodic: AtomicBool::new(false),
        }
    }

    /// Identity and registration metadata of the metricset.
    pub fn base(&self) -> &BaseMetricSet {
        self.metric_set.base()
    }

    /// Unique id of the metricset instance.
    pub fn id(&self) -> &str {
        self.base().id()
    }

    /// Metricset name.
    pub fn name(&self) -> &str {
        self.base().name()
    }

    /// Name of the owning module.
    pub fn module_name(&self) -> &str {
        self.unit.module.name()
    }

    /// Resolved host of the metricset.
    pub fn host(&self) -> &str {
        self.base().host()
    }

    /// Registered namespace of the metricset.
    pub fn namespace(&self) -> &str {
        self.base().namespace()
    }

    /// Cached execution protocol.
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Shared counters for this module/metricset pair.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Whether the worker entered the periodic-fetch loop.
    pub fn is_periodic(&self) -> bool {
        self.periodic.load(Ordering::Acquire)
    }

    pub(crate) fn period(&self) -> Duration {
        self.unit.module.period()
    }

    pub(crate) fn modifiers(&self) -> &[EventModifier] {
        &self.unit.modifiers
    }

    pub(crate) fn metrics(&self) -> Arc<dyn MetricSource> {
        Arc::clone(&self.metrics) as Arc<dyn MetricSource>
    }

    pub(crate) fn mark_periodic(&self) {
        self.periodic.store(true, Ordering::Release);
    }

    pub(crate) fn mark_started(&self) {
        let _ = self.metrics.start_time.set(Utc::now());
    }

    pub(crate) fn take_stats_handle(&self) -> Option<StatsHandle> {
        self.stats_handle.lock().take()
    }

    pub(crate) fn record_outcome(&self, failed: bool) {
        for stats in [&*self.stats, &self.metrics.counters] {
            if failed {
                stats.record_failure();
            } else {
                stats.record_success();
            }
        }
    }

    pub(crate) fn record_published(&self) {
        self.stats.record_event();
        self.metrics.counters.record_event();
    }

    /// Run the metricset until shutdown or until its push loop returns.
    ///
    /// Panics from metricset code are caught and logged here.
    pub(crate) async fn run(self: &Arc<Self>, done: CancellationToken, out: mpsc::Sender<BeatEvent>) {
        let outcome = AssertUnwindSafe(self.run_protocol(done, out))
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            tracing::error!(
                module = %self.module_name(),
                metricset = %self.name(),
                host = %self.host(),
                panic = %panic_message(panic.as_ref()),
                "Recovered from panic while fetching"
            );
        }
    }

    async fn run_protocol(self: &Arc<Self>, done: CancellationToken, out: mpsc::Sender<BeatEvent>) {
        let max_start_delay = self.unit.max_start_delay;
        if !max_start_delay.is_zero() {
            let delay = start_delay(max_start_delay);
            tracing::debug!(
                module = %self.module_name(),
                metricset = %self.name(),
                delay = %humantime::format_duration(delay),
                "Delaying metricset start"
            );
            tokio::select! {
                _ = done.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!("Starting {self}");
        let reporter = EventReporter::new(Arc::clone(self), done.clone(), out);

        match &self.capability {
            Capability::Push(Pusher::V1(ms)) => ms.run(reporter.v1()).await,
            Capability::Push(Pusher::V2(ms)) => ms.run(reporter.v2()).await,
            Capability::Push(Pusher::V2WithContext(ms)) => {
                ms.run(FetchContext::new(done), reporter.v2()).await
            }
            Capability::Periodic(fetcher) => {
                self.start_periodic_fetching(fetcher, &FetchContext::new(done), &reporter)
                    .await
            }
            Capability::Unsupported => {
                tracing::error!(
                    module = %self.module_name(),
                    metricset = %self.name(),
                    "MetricSet does not implement an event producing interface"
                );
            }
        }
        tracing::debug!("Stopped {self}");
    }

    /// Fetch immediately, then once per module period until shutdown.
    async fn start_periodic_fetching(
        &self,
        fetcher: &Fetcher,
        ctx: &FetchContext,
        reporter: &Arc<EventReporter>,
    ) {
        self.mark_periodic();

        self.fetch(fetcher, ctx, reporter).await;

        let period = self.period();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ctx.done() => return,
                _ = ticker.tick() => self.fetch(fetcher, ctx, reporter).await,
            }
        }
    }

    async fn fetch(&self, fetcher: &Fetcher, ctx: &FetchContext, reporter: &Arc<EventReporter>) {
        reporter.start_fetch_timer();
        match fetcher {
            Fetcher::V1(ms) => ms.fetch(&reporter.v1()).await,
            Fetcher::V2(ms) => ms.fetch(&reporter.v2()).await,
            Fetcher::V2Error(ms) => {
                let result = ms.fetch(&reporter.v2()).await;
                self.handle_fetch_result(result, reporter).await;
            }
            Fetcher::V2WithContext(ms) => {
                let result = ms.fetch(ctx, &reporter.v2()).await;
                self.handle_fetch_result(result, reporter).await;
            }
        }
    }

    async fn handle_fetch_result(&self, result: Result<(), BoxError>, reporter: &Arc<EventReporter>) {
        let module = self.unit.module.as_ref();
        match result {
            Ok(()) => module.update_status(Status::Running, ""),
            Err(err) => {
                let message = format!(
                    "Error fetching data for metricset {}.{}: {}",
                    module.name(),
                    self.name(),
                    err
                );
                tracing::error!(
                    module = %module.name(),
                    metricset = %self.name(),
                    error = %err,
                    "Error fetching data for metricset"
                );
                reporter.v2().error(err).await;
                module.update_status(Status::Degraded, &message);
            }
        }
    }

    /// Run the metricset's cleanup hook, logging failures and panics.
    pub(crate) async fn close(&self) {
        match AssertUnwindSafe(self.metric_set.close()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(
                module = %self.module_name(),
                metricset = %self.name(),
                error = %err,
                "Failed to close metricset"
            ),
            Err(panic) => tracing::error!(
                module = %self.module_name(),
                metricset = %self.name(),
                panic = %panic_message(panic.as_ref()),
                "Recovered from panic while closing metricset"
            ),
        }
    }

    /// Run until the first event is reported or `timeout` elapses.
    pub(crate) async fn probe(self: &Arc<Self>, timeout: Duration) -> Result<BeatEvent, WrapperError> {
        let done = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(super::OUTPUT_CAPACITY);

        let worker = Arc::clone(self);
        let run_done = done.clone();
        tokio::spawn(async move { worker.run(run_done, tx).await });

        let received = tokio::time::timeout(timeout, rx.recv()).await;
        done.cancel();

        match received {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(WrapperError::ProbeNoEvent {
                module: self.module_name().to_owned(),
                metric_set: self.name().to_owned(),
            }),
            Err(_) => Err(WrapperError::ProbeTimeout {
                module: self.module_name().to_owned(),
                metric_set: self.name().to_owned(),
                timeout,
            }),
        }
    }
}

impl std::fmt::Display for MetricSetWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "metricSetWrapper[module={}, name={}, host={}]",
            self.module_name(),
            self.name(),
            self.host()
        )
    }
}

impl std::fmt::Debug for MetricSetWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSetWorker")
            .field("module", &self.module_name())
            .field("name", &self.name())
            .field("host", &self.host())
            .field("capability", &self.capability)
            .field("periodic", &self.is_periodic())
            .finish_non_exhaustive()
    }
}

/// Uniform random delay in `[0, max)`.
fn start_delay(max: Duration) -> Duration {
    rand::thread_rng().gen_range(Duration::ZERO..max)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_delay_within_bounds() {
        let max = Duration::from_millis(50);
        for _ in 0..1000 {
            assert!(start_delay(max) < max);
        }
    }

    #[test]
    fn test_panic_message() {
        let static_panic: Box<dyn Any + Send> = Box::new("static");
        let owned_panic: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other_panic: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(static_panic.as_ref()), "static");
        assert_eq!(panic_message(owned_panic.as_ref()), "owned");
        assert_eq!(panic_message(other_panic.as_ref()), "unknown panic");
    }
}
