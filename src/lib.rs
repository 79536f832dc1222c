//! Harvester - Metricset Scheduler Library
//!
//! This crate runs metric collectors ("metricsets") grouped into modules and
//! funnels everything they report into one bounded event stream. It can be
//! used as a library by other Rust projects, or run as a standalone binary
//! with the `harvester` executable.
//!
//! # Architecture
//!
//! - **mb**: The metricset API (modules, metricsets, protocols, events)
//! - **module**: The scheduler that runs a module's metricsets in Tokio tasks
//! - **stats**: Reference-counted success/failure/event counters
//! - **telemetry**: Namespaced JSON snapshots of live counters
//! - **config**: YAML configuration loading and validation
//! - **builtin**: Metricsets shipped with the binary
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use harvester::builtin::uptime::UptimeMetricSet;
//! use harvester::{BaseModule, StatsRegistry, Wrapper};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let stats = StatsRegistry::default();
//! let module = Arc::new(BaseModule::new("self", Duration::from_secs(10)));
//! let wrapper = Wrapper::builder(module)
//!     .metric_set(Arc::new(UptimeMetricSet::new("self")))
//!     .stats_registry(stats.clone())
//!     .build()?;
//!
//! let done = CancellationToken::new();
//! let mut events = wrapper.start(done.clone());
//! if let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! done.cancel();
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod config;
pub mod mb;
pub mod module;
pub mod stats;
pub mod telemetry;

pub use config::{AppConfig, ConfigError, ModuleConfig};
pub use mb::{BaseMetricSet, BaseModule, BeatEvent, BoxError, Event, MetricSet, Module, Status};
pub use module::{
    MetricSetWorker, ProbeOutcome, PushReporter, PushReporterV2, Wrapper, WrapperBuilder,
    WrapperError,
};
pub use stats::{Stats, StatsHandle, StatsRegistry};
pub use telemetry::{MetricSource, TelemetryRegistry};
