//! Metricset API
//!
//! Everything collector code needs to plug into the scheduler:
//!
//! - [`Module`] / [`BaseModule`]: a configured module and its health status
//! - [`MetricSet`] / [`BaseMetricSet`]: a metricset and its identity
//! - [`Capability`]: the execution protocol a metricset implements
//! - [`Event`] / [`BeatEvent`]: a reported measurement and its shippable form
//! - [`FetchContext`]: cancellation context for context-aware protocols

pub mod context;
pub mod event;
mod metricset;
mod module;

pub use context::{ContextError, FetchContext};
pub use event::{
    BeatEvent, Event, EventModifier, Fields, add_service_type, put_value, transform_map_to_event,
};
pub use metricset::{
    BaseMetricSet, Capability, Fetcher, MetricSet, PushMetricSet, PushMetricSetV2,
    PushMetricSetV2WithContext, Pusher, ReportingMetricSet, ReportingMetricSetV2,
    ReportingMetricSetV2Error, ReportingMetricSetV2WithContext,
};
pub use module::{BaseModule, Module, Status, StatusUpdate};

/// Error type returned by collector code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
