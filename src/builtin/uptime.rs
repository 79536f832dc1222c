//! Process uptime metricset.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::mb::{
    BaseMetricSet, BoxError, Capability, Event, Fetcher, Fields, MetricSet,
    ReportingMetricSetV2Error,
};
use crate::module::PushReporterV2;

/// Metricset name.
pub const NAME: &str = "uptime";

/// Reports how long the process has been collecting.
pub struct UptimeMetricSet {
    base: BaseMetricSet,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl UptimeMetricSet {
    /// Create the metricset for `module`.
    pub fn new(module: &str) -> Self {
        Self {
            base: BaseMetricSet::new(module, NAME),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

impl MetricSet for UptimeMetricSet {
    fn base(&self) -> &BaseMetricSet {
        &self.base
    }

    fn capability(self: Arc<Self>) -> Capability {
        Capability::Periodic(Fetcher::V2Error(self))
    }
}

#[async_trait::async_trait]
impl ReportingMetricSetV2Error for UptimeMetricSet {
    async fn fetch(&self, reporter: &PushReporterV2) -> Result<(), BoxError> {
        let uptime = self.started.elapsed();
        let ms = u64::try_from(uptime.as_millis())?;

        let mut fields = Fields::new();
        fields.insert("ms".to_owned(), ms.into());
        fields.insert("start_time".to_owned(), self.started_at.to_rfc3339().into());

        reporter.event(Event::new(fields)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mb::BaseModule;
    use crate::module::Wrapper;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_uptime_reports_event() {
        let module = Arc::new(BaseModule::new("self", Duration::from_secs(10)));
        let wrapper = Wrapper::for_metric_set(module, Arc::new(UptimeMetricSet::new("self"))).unwrap();

        let outcomes = wrapper.probe().await;
        let event = outcomes[0].result.as_ref().unwrap();
        assert!(event.get_value("self.uptime.ms").unwrap().is_u64());
        assert!(event.get_value("self.uptime.start_time").unwrap().is_string());
        assert_eq!(event.get_value("event.dataset"), Some(&json!("self.uptime")));
        assert_eq!(event.get_value("metricset.period"), Some(&json!(10_000u64)));
    }
}
