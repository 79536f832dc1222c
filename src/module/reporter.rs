//! Event reporters handed to metricset code.
//!
//! [`PushReporterV2`] is the primary surface; [`PushReporter`] adapts the
//! legacy map-shaped API onto it. Both are cheap to clone and share one
//! [`EventReporter`] per running worker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::worker::MetricSetWorker;
use crate::mb::{BeatEvent, BoxError, Event, Fields, transform_map_to_event};

#[derive(Debug, Clone, Copy)]
struct FetchStart {
    instant: Instant,
    time: DateTime<Utc>,
}

/// Per-worker reporting state: the output channel, the shutdown token and
/// the start of the current fetch cycle.
pub(crate) struct EventReporter {
    worker: Arc<MetricSetWorker>,
    done: CancellationToken,
    out: mpsc::Sender<BeatEvent>,
    start: Mutex<Option<FetchStart>>,
}

impl EventReporter {
    pub(crate) fn new(
        worker: Arc<MetricSetWorker>,
        done: CancellationToken,
        out: mpsc::Sender<BeatEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            worker,
            done,
            out,
            start: Mutex::new(None),
        })
    }

    /// Mark the start of a fetch cycle; elapsed time is measured from here.
    pub(crate) fn start_fetch_timer(&self) {
        *self.start.lock() = Some(FetchStart {
            instant: Instant::now(),
            time: Utc::now(),
        });
    }

    pub(crate) fn v1(self: &Arc<Self>) -> PushReporter {
        PushReporter {
            v2: self.v2(),
            module: self.worker.module_name().to_owned(),
        }
    }

    pub(crate) fn v2(self: &Arc<Self>) -> PushReporterV2 {
        PushReporterV2 {
            inner: Arc::clone(self),
        }
    }

    async fn event(&self, mut event: Event) -> bool {
        let worker = &self.worker;
        let start = *self.start.lock();

        if event.took.is_zero()
            && let Some(start) = start
        {
            event.took = start.instant.elapsed();
        }

        if worker.is_periodic() {
            event.period = Some(worker.period());
        }

        if event.timestamp.is_none() {
            event.timestamp = Some(start.map_or_else(Utc::now, |start| start.time));
        }

        if event.host.is_empty() {
            event.host = worker.host().to_owned();
        }

        worker.record_outcome(event.error.is_some());

        if event.namespace.is_empty() {
            event.namespace = worker.namespace().to_owned();
        }

        let beat_event =
            event.into_beat_event(worker.module_name(), worker.name(), worker.modifiers());
        if !write_event(&self.done, &self.out, beat_event).await {
            return false;
        }

        worker.record_published();
        true
    }
}

/// Send `event` unless the shutdown signal fires first.
async fn write_event(
    done: &CancellationToken,
    out: &mpsc::Sender<BeatEvent>,
    event: BeatEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = done.cancelled() => false,
        sent = out.send(event) => sent.is_ok(),
    }
}

/// Reporter for structured [`Event`]s.
#[derive(Clone)]
pub struct PushReporterV2 {
    inner: Arc<EventReporter>,
}

impl PushReporterV2 {
    /// Report an event.
    ///
    /// Returns `false` when the event was not accepted because the module is
    /// shutting down; the caller should stop producing.
    pub async fn event(&self, event: Event) -> bool {
        self.inner.event(event).await
    }

    /// Report an error as an event.
    pub async fn error(&self, error: impl Into<BoxError> + Send) -> bool {
        self.inner.event(Event::from_error(error)).await
    }

    /// Resolves when the module is shutting down.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.inner.done.cancelled()
    }

    /// Whether the module is shutting down.
    pub fn is_done(&self) -> bool {
        self.inner.done.is_cancelled()
    }
}

impl std::fmt::Debug for PushReporterV2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushReporterV2")
            .field("metric_set", &self.inner.worker.name())
            .finish_non_exhaustive()
    }
}

/// Legacy reporter for flat field maps.
///
/// Maps are converted with [`transform_map_to_event`] and forwarded to the
/// structured reporter.
#[derive(Clone)]
pub struct PushReporter {
    v2: PushReporterV2,
    module: String,
}

impl PushReporter {
    /// Report a field map.
    pub async fn event(&self, fields: Fields) -> bool {
        self.error_with(None, Some(fields)).await
    }

    /// Report an error.
    pub async fn error(&self, error: impl Into<BoxError> + Send) -> bool {
        self.error_with(Some(error.into()), None).await
    }

    /// Report an error with accompanying fields.
    ///
    /// Nothing is reported when both are absent, and the call returns `true`.
    pub async fn error_with(&self, error: Option<BoxError>, fields: Option<Fields>) -> bool {
        if error.is_none() && fields.is_none() {
            return true;
        }
        let event = transform_map_to_event(&self.module, fields.unwrap_or_default(), error);
        self.v2.event(event).await
    }

    /// Resolves when the module is shutting down.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.v2.done()
    }
}

impl std::fmt::Debug for PushReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushReporter")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}
