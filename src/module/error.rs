//! Module wrapper error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while building or probing a [`Wrapper`](super::Wrapper).
#[derive(Debug, Error)]
pub enum WrapperError {
    /// The module was given no metricsets to run.
    #[error("module '{module}' has no metricsets")]
    NoMetricSets {
        /// Module name.
        module: String,
    },

    /// A polled metricset belongs to a module with a zero period.
    #[error("module '{module}' has a zero period but metricset '{metric_set}' is polled")]
    ZeroPeriod {
        /// Module name.
        module: String,
        /// Metricset name.
        metric_set: String,
    },

    /// A probed metricset did not report within the allotted time.
    #[error("metricset '{module}/{metric_set}' reported no event within {timeout:?}")]
    ProbeTimeout {
        /// Module name.
        module: String,
        /// Metricset name.
        metric_set: String,
        /// Time waited.
        timeout: Duration,
    },

    /// A probed metricset stopped without reporting.
    #[error("metricset '{module}/{metric_set}' stopped without reporting an event")]
    ProbeNoEvent {
        /// Module name.
        module: String,
        /// Metricset name.
        metric_set: String,
    },
}
