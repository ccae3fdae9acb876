use crate::TransportError;
use std::{future::Future, time::Duration};
use tokio::time::Instant;

/// Timeout applied when neither the caller nor the request provides one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-call context carrying an optional deadline.
///
/// Cancellation is cooperative: dropping the future returned by a call aborts it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Derive the context for one outbound attempt.
    ///
    /// An existing deadline is kept unchanged. Otherwise `timeout` is used when it is
    /// positive, falling back to [`DEFAULT_TIMEOUT`].
    pub fn derive(&self, timeout: Option<Duration>) -> Self {
        if self.deadline.is_some() {
            return *self;
        }
        let timeout = timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT);
        Self::with_timeout(timeout)
    }

    /// Drive `future` to completion, giving up once the deadline passes.
    pub async fn run<F, T>(&self, future: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, future)
                .await
                .map_err(|_| TransportError::DeadlineExceeded)?,
            None => future.await,
        }
    }
}
