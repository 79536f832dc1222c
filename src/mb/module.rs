//! Module interface and health status.

use std::time::Duration;

use strum_macros::{AsRefStr, Display, EnumString};
use tokio::sync::watch;

/// Health of a module as seen by an external observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Status {
    /// A metricset of the module is starting.
    Starting,
    /// The last fetch cycle succeeded.
    Running,
    /// The last fetch cycle failed.
    Degraded,
}

/// A status change with its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New status.
    pub status: Status,
    /// Context for the change, empty when there is nothing to add.
    pub message: String,
}

/// A configured module that groups one or more metricsets.
pub trait Module: Send + Sync + 'static {
    /// Module name, e.g. `"redis"`.
    fn name(&self) -> &str;

    /// Fixed period between fetch cycles of polled metricsets.
    fn period(&self) -> Duration;

    /// Receive a health status update. Ignored by default.
    fn update_status(&self, _status: Status, _message: &str) {}
}

/// Plain [`Module`] that publishes status updates on a watch channel.
#[derive(Debug)]
pub struct BaseModule {
    name: String,
    period: Duration,
    status: watch::Sender<Option<StatusUpdate>>,
}

impl BaseModule {
    /// Create a module with the given name and polling period.
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            name: name.into(),
            period,
            status,
        }
    }

    /// Subscribe to status updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<StatusUpdate>> {
        self.status.subscribe()
    }

    /// Most recent status update, if any.
    pub fn status(&self) -> Option<StatusUpdate> {
        self.status.borrow().clone()
    }
}

impl Module for BaseModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn update_status(&self, status: Status, message: &str) {
        tracing::debug!(module = %self.name, %status, message, "Module status updated");
        self.status.send_replace(Some(StatusUpdate {
            status,
            message: message.to_owned(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_strings() {
        assert_eq!(Status::Degraded.to_string(), "degraded");
        assert_eq!(Status::Running.as_ref(), "running");
        assert_eq!(Status::from_str("STARTING").unwrap(), Status::Starting);
        assert!(Status::from_str("stopped").is_err());
    }

    #[test]
    fn test_base_module_records_latest_status() {
        let module = BaseModule::new("redis", Duration::from_secs(10));
        assert_eq!(module.name(), "redis");
        assert_eq!(module.period(), Duration::from_secs(10));
        assert!(module.status().is_none());

        module.update_status(Status::Starting, "redis/info is starting");
        module.update_status(Status::Degraded, "boom");

        assert_eq!(
            module.status(),
            Some(StatusUpdate {
                status: Status::Degraded,
                message: "boom".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_base_module_notifies_subscribers() {
        let module = BaseModule::new("redis", Duration::from_secs(10));
        let mut rx = module.subscribe();

        module.update_status(Status::Running, "");
        rx.changed().await.unwrap();

        let update = rx.borrow_and_update().clone().unwrap();
        assert_eq!(update.status, Status::Running);
        assert!(update.message.is_empty());
    }
}
