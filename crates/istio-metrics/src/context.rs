//! Cancellation-capable request context
//!
//! The context is created by the caller and handed to every provider
//! operation. The provider never sets its own timeouts; it only honors the
//! cancellation token and deadline carried here.

use crate::error::MetricsError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request execution context
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Context driven by an existing cancellation token
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derived context, cancelled whenever this one is
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` until it completes or the context gives up
    ///
    /// On cancellation or deadline the future is dropped, aborting any
    /// in-flight backend call.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, MetricsError>
    where
        F: Future<Output = Result<T, MetricsError>>,
    {
        if self.token.is_cancelled() {
            return Err(MetricsError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(MetricsError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Err(MetricsError::DeadlineExceeded),
                    result = fut => result,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(MetricsError::Cancelled),
                    result = fut => result,
                }
            }
        }
    }
}
