//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::module::{ModuleConfig, load_from_dir, validate_modules};
use super::validation::{ConfigError, expand_env_vars};

/// Default upper bound of the random start delay (10 seconds).
pub const DEFAULT_MAX_START_DELAY: Duration = Duration::from_secs(10);

fn default_max_start_delay() -> Duration {
    DEFAULT_MAX_START_DELAY
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upper bound of the random delay applied before each metricset starts
    /// (default: 10s, `0s` disables it).
    #[serde(default = "default_max_start_delay", with = "humantime_serde")]
    pub max_start_delay: Duration,

    /// Configured modules.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,

    /// Path to a directory with additional module config files.
    #[serde(default)]
    pub module_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_start_delay: DEFAULT_MAX_START_DELAY,
            modules: Vec::new(),
            module_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let content = expand_env_vars(&raw);
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration including the `module_path` directory.
    ///
    /// If `module_path` is specified, every YAML file in it is read and its
    /// modules are appended to the ones from the main file.
    pub fn load_with_module_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;

        if let Some(ref module_dir) = config.module_path {
            let additional = load_from_dir(module_dir)?;
            config.modules.extend(additional);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns the first invalid module setting as a `ConfigError`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_modules(&self.modules)
    }

    /// Modules with `enabled: true`.
    pub fn enabled_modules(&self) -> impl Iterator<Item = &ModuleConfig> {
        self.modules.iter().filter(|m| m.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.max_start_delay, DEFAULT_MAX_START_DELAY);
        assert!(config.modules.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvester.yaml");
        std::fs::write(
            &path,
            r#"
max_start_delay: 2s
modules:
  - module: self
    metricsets: [uptime, pulse]
    period: 5s
  - module: tcp
    metricsets: [connect]
    enabled: false
    hosts: ["${HARVESTER_UNSET_HOST_4242:-127.0.0.1:6379}"]
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.max_start_delay, Duration::from_secs(2));
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[1].hosts, vec!["127.0.0.1:6379"]);

        let enabled: Vec<_> = config.enabled_modules().map(|m| m.module.as_str()).collect();
        assert_eq!(enabled, vec!["self"]);
    }

    #[test]
    fn test_load_rejects_invalid_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvester.yaml");
        std::fs::write(&path, "modules:\n  - module: self\n    metricsets: []\n").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::NoMetricSets { ref module } if module == "self"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/harvester.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_load_with_module_path() {
        let dir = tempfile::tempdir().unwrap();
        let modules_dir = dir.path().join("modules.d");
        std::fs::create_dir(&modules_dir).unwrap();
        std::fs::write(
            modules_dir.join("tcp.yml"),
            "- module: tcp\n  metricsets: [connect]\n  hosts: [\"127.0.0.1:80\"]\n",
        )
        .unwrap();

        let path = dir.path().join("harvester.yaml");
        std::fs::write(
            &path,
            format!(
                "max_start_delay: 0s\nmodule_path: {}\nmodules:\n  - module: self\n    metricsets: [uptime]\n",
                modules_dir.display()
            ),
        )
        .unwrap();

        let config = AppConfig::load_with_module_path(&path).unwrap();
        assert!(config.max_start_delay.is_zero());
        let names: Vec<_> = config.modules.iter().map(|m| m.module.as_str()).collect();
        assert_eq!(names, vec!["self", "tcp"]);
    }

    #[test]
    fn test_load_with_module_path_detects_cross_file_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let modules_dir = dir.path().join("modules.d");
        std::fs::create_dir(&modules_dir).unwrap();
        std::fs::write(
            modules_dir.join("self.yml"),
            "- module: self\n  metricsets: [uptime]\n",
        )
        .unwrap();

        let path = dir.path().join("harvester.yaml");
        std::fs::write(
            &path,
            format!(
                "module_path: {}\nmodules:\n  - module: self\n    metricsets: [uptime]\n",
                modules_dir.display()
            ),
        )
        .unwrap();

        let err = AppConfig::load_with_module_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMetricSet { .. }));
    }
}
