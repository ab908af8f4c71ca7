//! Request deadline and cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{MixerError, Result};

/// Shared flag a caller flips to abandon a fetch.
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// New, not yet cancelled token.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cancels every fetch holding this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether [`CancelToken::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Bounds every read of one request.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Option<Arc<CancelToken>>,
}

impl RequestContext {
    /// Context with no deadline and no cancellation.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, cancel: Arc<CancelToken>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn expired(&self) -> MixerError {
        MixerError::DeadlineExceeded(self.timeout.unwrap_or_default())
    }

    /// Fails when the request was cancelled or its deadline passed.
    pub fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(MixerError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(self.expired());
        }
        Ok(())
    }

    /// Drives `fut` until it finishes, the deadline passes, or the request is
    /// cancelled; in the last two cases `fut` is dropped.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let cancelled = async {
            match &self.cancel {
                Some(cancel) => cancel.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            result = fut => result,
            _ = cancelled => Err(MixerError::Cancelled),
            _ = expired => Err(self.expired()),
        }
    }
}
