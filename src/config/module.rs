//! Module configuration structures.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars};

/// Default fetch period (10 seconds).
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);

/// Default per-host timeout (3 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

fn default_enabled() -> bool {
    true
}

fn default_period() -> Duration {
    DEFAULT_PERIOD
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// One configured module and the metricsets to run for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module name, e.g. `"tcp"`.
    pub module: String,

    /// Metricsets to run.
    #[serde(default)]
    pub metricsets: Vec<String>,

    /// Enable this module (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fetch period for polled metricsets (default: 10s).
    #[serde(default = "default_period", with = "humantime_serde")]
    pub period: Duration,

    /// Hosts to collect from. Host-aware metricsets run once per host.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Per-fetch timeout (default: 3s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl ModuleConfig {
    /// Configuration for `module` running `metricsets` with default settings.
    pub fn new<I, S>(module: impl Into<String>, metricsets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            module: module.into(),
            metricsets: metricsets.into_iter().map(Into::into).collect(),
            enabled: true,
            period: DEFAULT_PERIOD,
            hosts: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the fetch period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the hosts.
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-fetch timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate this module on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let module = || self.module.clone();

        if self.module.trim().is_empty() {
            return Err(ConfigError::EmptyModuleName);
        }
        if self.metricsets.is_empty() {
            return Err(ConfigError::NoMetricSets { module: module() });
        }
        if let Some(index) = self.metricsets.iter().position(|ms| ms.trim().is_empty()) {
            return Err(ConfigError::EmptyMetricSetName {
                module: module(),
                index,
            });
        }
        for (field, value) in [("period", self.period), ("timeout", self.timeout)] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration {
                    module: module(),
                    field,
                });
            }
        }
        if self.hosts.iter().any(|host| host.trim().is_empty()) {
            return Err(ConfigError::EmptyHost { module: module() });
        }
        Ok(())
    }
}

/// Validate a list of modules, including cross-module checks.
///
/// Disabled modules are skipped. A module/metricset pair may appear more
/// than once only when every occurrence lists hosts.
pub fn validate_modules(modules: &[ModuleConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for module in modules.iter().filter(|m| m.enabled) {
        module.validate()?;

        if !module.hosts.is_empty() {
            continue;
        }
        for metricset in &module.metricsets {
            if !seen.insert((module.module.as_str(), metricset.as_str())) {
                return Err(ConfigError::DuplicateMetricSet {
                    module: module.module.clone(),
                    metric_set: metricset.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Load module lists from all YAML files in a directory.
///
/// Each file holds a YAML sequence of modules. Files are read in name order
/// so the result is stable.
pub fn load_from_dir(dir_path: impl AsRef<Path>) -> Result<Vec<ModuleConfig>, ConfigError> {
    let dir = dir_path.as_ref();
    if !dir.is_dir() {
        return Err(ConfigError::ModulePath {
            path: dir.to_path_buf(),
        });
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext == "yaml" || ext == "yml" {
            paths.push(path);
        }
    }
    paths.sort();

    let mut modules = Vec::new();
    for path in paths {
        tracing::debug!("Loading module config from: {}", path.display());
        let raw = std::fs::read_to_string(&path)?;
        let content = expand_env_vars(&raw);
        let file_modules: Vec<ModuleConfig> = serde_yaml::from_str(&content)
            .map_err(|source| ConfigError::ModuleFile { path: path.clone(), source })?;
        modules.extend(file_modules);
    }

    Ok(modules)
}
