//! Configuration for the harvester binary.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Scheduler settings (maximum start delay)
//! - Module definitions (metricsets, period, hosts, timeout)
//! - An optional directory of additional module files

mod app;
mod module;
mod validation;

pub use app::{AppConfig, DEFAULT_MAX_START_DELAY};
pub use module::{DEFAULT_PERIOD, DEFAULT_TIMEOUT, ModuleConfig, load_from_dir, validate_modules};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
