//! TCP connect probe metricset.
//!
//! Measures TCP connection latency to one host per instance.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::mb::{
    BaseMetricSet, BoxError, Capability, ContextError, Event, FetchContext, Fetcher, Fields,
    MetricSet, ReportingMetricSetV2WithContext,
};
use crate::module::PushReporterV2;

/// Metricset name.
pub const NAME: &str = "connect";

/// Connects to `host` once per fetch and reports the latency.
///
/// Refused or timed-out connections fail the fetch, which marks the module
/// degraded until the next successful connect. A connect still pending at
/// shutdown fails with [`ContextError::Canceled`].
pub struct ConnectMetricSet {
    base: BaseMetricSet,
    timeout: Duration,
}

impl ConnectMetricSet {
    /// Probe `host` (`address:port`) with the given connect timeout.
    pub fn new(module: &str, host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base: BaseMetricSet::new(module, NAME).with_host(host),
            timeout,
        }
    }

    /// Connect timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for ConnectMetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectMetricSet")
            .field("host", &self.base.host())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MetricSet for ConnectMetricSet {
    fn base(&self) -> &BaseMetricSet {
        &self.base
    }

    fn capability(self: Arc<Self>) -> Capability {
        Capability::Periodic(Fetcher::V2WithContext(self))
    }
}

#[async_trait::async_trait]
impl ReportingMetricSetV2WithContext for ConnectMetricSet {
    async fn fetch(&self, ctx: &FetchContext, reporter: &PushReporterV2) -> Result<(), BoxError> {
        let target = self.base.host();

        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ContextError::Canceled.into()),
            result = timeout(self.timeout, TcpStream::connect(target)) => result,
        };
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(_stream)) => {
                let ms = elapsed.as_secs_f64() * 1000.0;
                tracing::debug!(host = %target, latency_ms = ms, "TCP connect successful");

                let mut fields = Fields::new();
                fields.insert("latency_ms".to_owned(), ms.into());
                fields.insert("reachable".to_owned(), true.into());
                reporter.event(Event::new(fields)).await;
                Ok(())
            }
            Ok(Err(e)) => Err(format!("connect to {target} failed: {e}").into()),
            Err(_) => Err(format!(
                "connect to {target} timed out after {}",
                humantime::format_duration(self.timeout)
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mb::{BaseModule, Status};
    use crate::module::Wrapper;
    use serde_json::json;
    use std::io::ErrorKind;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_connect_success() {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                // Some sandboxed environments disallow binding; skip the test.
                return;
            }
            Err(e) => panic!("Failed to bind test listener: {e}"),
        };
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let module = Arc::new(BaseModule::new("tcp", Duration::from_secs(10)));
        let connect = Arc::new(ConnectMetricSet::new("tcp", addr.to_string(), Duration::from_secs(1)));
        let wrapper = Wrapper::for_metric_set(module.clone(), connect).unwrap();

        let outcomes = wrapper.probe().await;
        let event = outcomes[0].result.as_ref().unwrap();
        assert_eq!(event.get_value("tcp.connect.reachable"), Some(&json!(true)));
        assert!(event.get_value("tcp.connect.latency_ms").unwrap().is_f64());
        assert_eq!(event.get_value("service.address"), Some(&json!(addr.to_string())));
        assert_eq!(outcomes[0].host, addr.to_string());
    }

    #[tokio::test]
    async fn test_connect_during_shutdown_fails_with_canceled() {
        let module = Arc::new(BaseModule::new("tcp", Duration::from_secs(10)));
        let connect = Arc::new(ConnectMetricSet::new("tcp", "127.0.0.1:9", Duration::from_secs(30)));
        let wrapper = Wrapper::for_metric_set(module.clone(), connect).unwrap();

        // Without a start delay the first fetch runs even though shutdown
        // already fired.
        let done = CancellationToken::new();
        done.cancel();
        let mut rx = wrapper.start(done);
        assert!(rx.recv().await.is_none());

        let status = module.status().unwrap();
        assert_eq!(status.status, Status::Degraded);
        assert_eq!(
            status.message,
            "Error fetching data for metricset tcp.connect: context canceled"
        );
    }

    #[tokio::test]
    async fn test_connect_refused_degrades_module() {
        // Bind then drop to get a port with no listener.
        let addr = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l.local_addr().unwrap(),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return,
            Err(e) => panic!("Failed to bind test listener: {e}"),
        };

        let module = Arc::new(BaseModule::new("tcp", Duration::from_secs(10)));
        let connect = Arc::new(ConnectMetricSet::new(
            "tcp",
            addr.to_string(),
            Duration::from_millis(500),
        ));
        let wrapper = Wrapper::for_metric_set(module.clone(), connect).unwrap();

        let done = CancellationToken::new();
        let mut rx = wrapper.start(done.clone());
        let event = rx.recv().await.unwrap();
        let message = event.get_value("error.message").unwrap().as_str().unwrap();
        assert!(message.starts_with(&format!("connect to {addr} failed")));

        done.cancel();
        while rx.recv().await.is_some() {}

        let status = module.status().unwrap();
        assert_eq!(status.status, Status::Degraded);
        assert!(status.message.starts_with("Error fetching data for metricset tcp.connect:"));
    }
}
