//! Configuration errors and the string helpers used while loading files.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file or directory could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The main configuration file is not valid YAML for [`AppConfig`].
    ///
    /// [`AppConfig`]: super::AppConfig
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A file under `module_path` is not a valid module list.
    #[error("failed to parse '{}': {source}", .path.display())]
    ModuleFile {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// `module_path` is missing or not a directory.
    #[error("module_path '{}' is not a directory", .path.display())]
    ModulePath { path: PathBuf },

    /// A module entry has a blank `module` name.
    #[error("module name cannot be empty")]
    EmptyModuleName,

    /// A module entry lists no metricsets.
    #[error("module '{module}': metricsets cannot be empty")]
    NoMetricSets { module: String },

    /// A metricset name is blank.
    #[error("module '{module}': metricset #{index} has an empty name")]
    EmptyMetricSetName { module: String, index: usize },

    /// A duration setting that must be positive is zero.
    #[error("module '{module}': {field} must be non-zero")]
    ZeroDuration { module: String, field: &'static str },

    /// A `hosts` entry is blank.
    #[error("module '{module}': hosts cannot contain empty entries")]
    EmptyHost { module: String },

    /// The same host-less module/metricset pair is enabled twice.
    #[error("duplicate metricset: '{module}/{metric_set}'")]
    DuplicateMetricSet { module: String, metric_set: String },

    /// No built-in metricset is registered under this name.
    #[error("unknown metricset '{module}/{metric_set}'")]
    UnknownMetricSet { module: String, metric_set: String },

    /// A host-aware metricset was configured without hosts.
    #[error("metricset '{module}/{metric_set}' requires at least one host")]
    MissingHosts { module: String, metric_set: String },

    /// A duration string could not be parsed.
    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },
}

/// Parse a human readable duration such as `500ms`, `10s` or `1h30m`.
///
/// Used as the CLI value parser for delay flags.
///
/// ```
/// use std::time::Duration;
/// use harvester::config::parse_duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration(" 250ms ").unwrap(), Duration::from_millis(250));
/// assert!(parse_duration("").is_err());
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidDuration {
            input: input.to_owned(),
            reason: "empty string".to_owned(),
        });
    }
    humantime::parse_duration(trimmed).map_err(|e| ConfigError::InvalidDuration {
        input: trimmed.to_owned(),
        reason: e.to_string(),
    })
}

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env reference regex")
});

/// Substitute `${VAR}` and `${VAR:-fallback}` references from the process
/// environment.
///
/// An unset variable takes its fallback, or the empty string when none is
/// given. Input without references is returned borrowed.
pub fn expand_env_vars(input: &str) -> Cow<'_, str> {
    ENV_REFERENCE.replace_all(input, |caps: &Captures<'_>| {
        std::env::var(&caps[1])
            .ok()
            .or_else(|| caps.get(2).map(|fallback| fallback.as_str().to_owned()))
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for input in ["", "   ", "soon", "10"] {
            let err = parse_duration(input).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidDuration { .. }), "{input:?}");
        }
        assert!(
            parse_duration("ten")
                .unwrap_err()
                .to_string()
                .starts_with("invalid duration 'ten': ")
        );
    }

    #[test]
    fn test_expand_env_vars_borrows_plain_input() {
        let expanded = expand_env_vars("module: self");
        assert!(matches!(expanded, Cow::Borrowed("module: self")));
    }

    #[test]
    fn test_expand_env_vars_fallbacks() {
        assert_eq!(
            expand_env_vars("period: ${HARVESTER_UNSET_PERIOD_12345:-30s}"),
            "period: 30s"
        );
        assert_eq!(expand_env_vars("period: ${HARVESTER_UNSET_PERIOD_98765:-}"), "period: ");
        assert_eq!(expand_env_vars("[${HARVESTER_UNSET_HOST_55555}]"), "[]");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: only this test touches this variable.
        unsafe {
            std::env::set_var("HARVESTER_TEST_REDIS_HOST", "10.0.0.5:6379");
        }
        let result = expand_env_vars("hosts: [\"${HARVESTER_TEST_REDIS_HOST:-localhost}\"]");
        assert_eq!(result, "hosts: [\"10.0.0.5:6379\"]");
        // SAFETY: see above.
        unsafe {
            std::env::remove_var("HARVESTER_TEST_REDIS_HOST");
        }
    }
}
