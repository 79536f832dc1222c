//! Cancellation context handed to context-aware metricsets.

use std::time::Instant;

use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Reason a [`FetchContext`] is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The shutdown signal fired.
    #[error("context canceled")]
    Canceled,
}

/// Deadline-free cancellation context backed by the module shutdown token.
///
/// This lets context-aware metricsets observe the same signal every other
/// suspension point in the scheduler waits on.
#[derive(Debug, Clone)]
pub struct FetchContext {
    done: CancellationToken,
}

impl FetchContext {
    /// Wrap a shutdown token.
    pub fn new(done: CancellationToken) -> Self {
        Self { done }
    }

    /// Always `None`: the context only ends through cancellation.
    pub fn deadline(&self) -> Option<Instant> {
        None
    }

    /// Resolves once the shutdown signal fires.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    /// `Some(ContextError::Canceled)` after shutdown, `None` before.
    pub fn err(&self) -> Option<ContextError> {
        self.done.is_cancelled().then_some(ContextError::Canceled)
    }

    /// Context values are not supported; always `None`.
    pub fn value<T: 'static>(&self, _key: &str) -> Option<&T> {
        None
    }

    /// Whether the shutdown signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Underlying shutdown token.
    pub fn token(&self) -> &CancellationToken {
        &self.done
    }
}

impl From<CancellationToken> for FetchContext {
    fn from(done: CancellationToken) -> Self {
        Self::new(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_no_deadline() {
        let ctx = FetchContext::new(CancellationToken::new());
        assert!(ctx.deadline().is_none());
        assert!(ctx.value::<String>("anything").is_none());
    }

    #[test]
    fn test_err_tracks_cancellation() {
        let token = CancellationToken::new();
        let ctx = FetchContext::from(token.clone());
        assert_eq!(ctx.err(), None);

        token.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        assert_eq!(ctx.err().unwrap().to_string(), "context canceled");
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let token = CancellationToken::new();
        let ctx = FetchContext::new(token.clone());

        let waiter = tokio::spawn(async move { ctx.done().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("done() should resolve after cancel")
            .unwrap();
    }
}
