//! Metricset interface and the execution protocols a metricset can implement.
//!
//! A metricset advertises exactly one protocol through
//! [`MetricSet::capability`]. The scheduler reads it once when the worker is
//! built and dispatches on it from then on.
//!
//! - **Push** metricsets drive their own event loop and return when done.
//! - **Reporting** metricsets are polled: the scheduler calls `fetch` once
//!   immediately and then once per module period.

use std::sync::Arc;

use super::BoxError;
use super::context::FetchContext;
use crate::module::{PushReporter, PushReporterV2};

/// Identity and registration metadata shared by every metricset.
#[derive(Debug, Clone)]
pub struct BaseMetricSet {
    id: String,
    name: String,
    module: String,
    host: String,
    namespace: String,
}

impl BaseMetricSet {
    /// Metadata for metricset `name` of `module`, with a random unique id.
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            module: module.into(),
            host: String::new(),
            namespace: String::new(),
        }
    }

    /// Set the resolved host this instance collects from.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the registered namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Unique id of this instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Metricset name, e.g. `"info"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning module.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Resolved host, empty for host-less metricsets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Registered namespace, empty when none was declared.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// A metric-producing unit of work within a module.
#[async_trait::async_trait]
pub trait MetricSet: Send + Sync + 'static {
    /// Identity and registration metadata.
    fn base(&self) -> &BaseMetricSet;

    /// The execution protocol this metricset implements.
    ///
    /// Defaults to [`Capability::Unsupported`], which the scheduler logs and
    /// otherwise ignores.
    fn capability(self: Arc<Self>) -> Capability {
        Capability::Unsupported
    }

    /// Release resources when the worker stops. No-op by default.
    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Legacy push protocol reporting flat field maps.
#[async_trait::async_trait]
pub trait PushMetricSet: MetricSet {
    /// Produce events until the reporter signals done.
    async fn run(&self, reporter: PushReporter);
}

/// Push protocol reporting structured events.
#[async_trait::async_trait]
pub trait PushMetricSetV2: MetricSet {
    /// Produce events until the reporter signals done.
    async fn run(&self, reporter: PushReporterV2);
}

/// Push protocol with a cancellation context.
#[async_trait::async_trait]
pub trait PushMetricSetV2WithContext: MetricSet {
    /// Produce events until `ctx` is cancelled.
    async fn run(&self, ctx: FetchContext, reporter: PushReporterV2);
}

/// Legacy polling protocol reporting flat field maps.
#[async_trait::async_trait]
pub trait ReportingMetricSet: MetricSet {
    /// Run one fetch cycle.
    async fn fetch(&self, reporter: &PushReporter);
}

/// Polling protocol reporting structured events.
#[async_trait::async_trait]
pub trait ReportingMetricSetV2: MetricSet {
    /// Run one fetch cycle.
    async fn fetch(&self, reporter: &PushReporterV2);
}

/// Polling protocol whose fetch cycle can fail.
#[async_trait::async_trait]
pub trait ReportingMetricSetV2Error: MetricSet {
    /// Run one fetch cycle.
    async fn fetch(&self, reporter: &PushReporterV2) -> Result<(), BoxError>;
}

/// Fallible polling protocol with a cancellation context.
#[async_trait::async_trait]
pub trait ReportingMetricSetV2WithContext: MetricSet {
    /// Run one fetch cycle.
    async fn fetch(&self, ctx: &FetchContext, reporter: &PushReporterV2)
    -> Result<(), BoxError>;
}

/// Self-driven push protocols.
#[derive(Clone)]
pub enum Pusher {
    /// [`PushMetricSet`].
    V1(Arc<dyn PushMetricSet>),
    /// [`PushMetricSetV2`].
    V2(Arc<dyn PushMetricSetV2>),
    /// [`PushMetricSetV2WithContext`].
    V2WithContext(Arc<dyn PushMetricSetV2WithContext>),
}

/// Scheduler-driven polling protocols.
#[derive(Clone)]
pub enum Fetcher {
    /// [`ReportingMetricSet`].
    V1(Arc<dyn ReportingMetricSet>),
    /// [`ReportingMetricSetV2`].
    V2(Arc<dyn ReportingMetricSetV2>),
    /// [`ReportingMetricSetV2Error`].
    V2Error(Arc<dyn ReportingMetricSetV2Error>),
    /// [`ReportingMetricSetV2WithContext`].
    V2WithContext(Arc<dyn ReportingMetricSetV2WithContext>),
}

/// The execution protocol of a metricset.
#[derive(Clone)]
pub enum Capability {
    /// The metricset drives its own event loop.
    Push(Pusher),
    /// The scheduler polls the metricset every module period.
    Periodic(Fetcher),
    /// No recognized protocol.
    Unsupported,
}

impl Capability {
    /// Whether the scheduler drives this protocol with a ticker.
    pub fn is_periodic(&self) -> bool {
        matches!(self, Self::Periodic(_))
    }

    /// Short protocol name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Push(Pusher::V1(_)) => "push",
            Self::Push(Pusher::V2(_)) => "push_v2",
            Self::Push(Pusher::V2WithContext(_)) => "push_v2_context",
            Self::Periodic(Fetcher::V1(_)) => "reporting",
            Self::Periodic(Fetcher::V2(_)) => "reporting_v2",
            Self::Periodic(Fetcher::V2Error(_)) => "reporting_v2_error",
            Self::Periodic(Fetcher::V2WithContext(_)) => "reporting_v2_context",
            Self::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare {
        base: BaseMetricSet,
    }

    impl MetricSet for Bare {
        fn base(&self) -> &BaseMetricSet {
            &self.base
        }
    }

    struct Polled {
        base: BaseMetricSet,
    }

    #[async_trait::async_trait]
    impl MetricSet for Polled {
        fn base(&self) -> &BaseMetricSet {
            &self.base
        }

        fn capability(self: Arc<Self>) -> Capability {
            Capability::Periodic(Fetcher::V2Error(self))
        }
    }

    #[async_trait::async_trait]
    impl ReportingMetricSetV2Error for Polled {
        async fn fetch(&self, _reporter: &PushReporterV2) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[test]
    fn test_base_metric_set_defaults() {
        let base = BaseMetricSet::new("redis", "info");
        assert_eq!(base.module(), "redis");
        assert_eq!(base.name(), "info");
        assert!(base.host().is_empty());
        assert!(base.namespace().is_empty());
        assert_ne!(base.id(), BaseMetricSet::new("redis", "info").id());
    }

    #[test]
    fn test_base_metric_set_builder() {
        let base = BaseMetricSet::new("redis", "info")
            .with_host("127.0.0.1:6379")
            .with_namespace("redis.info")
            .with_id("fixed");
        assert_eq!(base.host(), "127.0.0.1:6379");
        assert_eq!(base.namespace(), "redis.info");
        assert_eq!(base.id(), "fixed");
    }

    #[test]
    fn test_default_capability_is_unsupported() {
        let ms = Arc::new(Bare {
            base: BaseMetricSet::new("m", "bare"),
        });
        let capability = ms.capability();
        assert!(!capability.is_periodic());
        assert_eq!(capability.kind(), "unsupported");
    }

    #[test]
    fn test_declared_capability() {
        let ms = Arc::new(Polled {
            base: BaseMetricSet::new("m", "polled"),
        });
        let capability = ms.capability();
        assert!(capability.is_periodic());
        assert_eq!(format!("{capability:?}"), "reporting_v2_error");
    }
}
