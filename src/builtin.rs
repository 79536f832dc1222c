//! Built-in metricsets shipped with the harvester binary.
//!
//! | Module | Metricset | Protocol                 | Hosts    |
//! |--------|-----------|--------------------------|----------|
//! | `self` | `uptime`  | polling, fallible        | ignored  |
//! | `self` | `pulse`   | push with context        | ignored  |
//! | `tcp`  | `connect` | polling with context     | required |

pub mod pulse;
pub mod tcp;
pub mod uptime;

use std::sync::Arc;

use crate::config::{ConfigError, ModuleConfig};
use crate::mb::MetricSet;

/// Every `(module, metricset)` pair this crate can instantiate.
pub const REGISTERED: &[(&str, &str)] = &[
    ("self", uptime::NAME),
    ("self", pulse::NAME),
    ("tcp", tcp::NAME),
];

/// Whether `module/metric_set` names a built-in metricset.
pub fn is_registered(module: &str, metric_set: &str) -> bool {
    REGISTERED
        .iter()
        .any(|&(m, ms)| m == module && ms == metric_set)
}

/// Instantiate the metricsets a module configuration asks for.
///
/// Host-aware metricsets get one instance per configured host.
///
/// # Errors
/// Returns [`ConfigError::UnknownMetricSet`] for names without a built-in
/// and [`ConfigError::MissingHosts`] when a host-aware metricset has no hosts.
pub fn metric_sets(config: &ModuleConfig) -> Result<Vec<Arc<dyn MetricSet>>, ConfigError> {
    let module = config.module.as_str();
    let mut metric_sets: Vec<Arc<dyn MetricSet>> = Vec::new();

    for name in &config.metricsets {
        match (module, name.as_str()) {
            ("self", uptime::NAME) => metric_sets.push(Arc::new(uptime::UptimeMetricSet::new(module))),
            ("self", pulse::NAME) => {
                metric_sets.push(Arc::new(pulse::PulseMetricSet::new(module, config.period)));
            }
            ("tcp", tcp::NAME) => {
                if config.hosts.is_empty() {
                    return Err(ConfigError::MissingHosts {
                        module: module.to_owned(),
                        metric_set: name.clone(),
                    });
                }
                for host in &config.hosts {
                    metric_sets.push(Arc::new(tcp::ConnectMetricSet::new(
                        module,
                        host,
                        config.timeout,
                    )));
                }
            }
            _ => {
                return Err(ConfigError::UnknownMetricSet {
                    module: module.to_owned(),
                    metric_set: name.clone(),
                });
            }
        }
    }

    Ok(metric_sets)
}
