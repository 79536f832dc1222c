//! Heartbeat metricset driven by its own timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::mb::{
    BaseMetricSet, Capability, Event, FetchContext, Fields, MetricSet, PushMetricSetV2WithContext,
    Pusher,
};
use crate::module::PushReporterV2;

/// Metricset name.
pub const NAME: &str = "pulse";

/// Emits a numbered heartbeat every `interval` until cancelled.
pub struct PulseMetricSet {
    base: BaseMetricSet,
    interval: Duration,
    sequence: AtomicU64,
}

impl PulseMetricSet {
    /// Create the metricset for `module`. A zero interval falls back to one
    /// second.
    pub fn new(module: &str, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            Duration::from_secs(1)
        } else {
            interval
        };
        Self {
            base: BaseMetricSet::new(module, NAME),
            interval,
            sequence: AtomicU64::new(0),
        }
    }

    /// Heartbeats emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl MetricSet for PulseMetricSet {
    fn base(&self) -> &BaseMetricSet {
        &self.base
    }

    fn capability(self: Arc<Self>) -> Capability {
        Capability::Push(Pusher::V2WithContext(self))
    }
}

#[async_trait::async_trait]
impl PushMetricSetV2WithContext for PulseMetricSet {
    async fn run(&self, ctx: FetchContext, reporter: PushReporterV2) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.done() => break,
                _ = ticker.tick() => {}
            }

            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            let mut fields = Fields::new();
            fields.insert("sequence".to_owned(), seq.into());

            if !reporter.event(Event::new(fields)).await {
                break;
            }
        }

        tracing::debug!(metricset = NAME, sent = self.sequence(), "Pulse stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mb::BaseModule;
    use crate::module::Wrapper;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_pulse_emits_until_cancelled() {
        let pulse = Arc::new(PulseMetricSet::new("self", Duration::from_secs(1)));
        let module = Arc::new(BaseModule::new("self", Duration::from_secs(1)));
        let wrapper = Wrapper::for_metric_set(module, pulse.clone()).unwrap();

        let done = CancellationToken::new();
        let mut rx = wrapper.start(done.clone());

        for expected in 0..3u64 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.get_value("self.pulse.sequence"), Some(&json!(expected)));
            assert!(event.get_value("metricset.period").is_none());
        }

        done.cancel();
        while rx.recv().await.is_some() {}
        assert!(pulse.sequence() >= 3);
    }

    #[test]
    fn test_zero_interval_falls_back() {
        let pulse = PulseMetricSet::new("self", Duration::ZERO);
        assert_eq!(pulse.interval, Duration::from_secs(1));
    }
}
