//! Cooperative cancellation for queries.

use std::future::Future;
use std::time::Duration;

use meterline_types::{EngineError, EngineResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline, carried by every query.
///
/// Leaf lookups of an aggregation are raced against both, so one slow leaf
/// cannot hold a query past its deadline.
#[derive(Debug, Clone)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast if the query is already cancelled or past its deadline.
    pub fn check(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(cancelled_by_caller());
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(deadline_elapsed());
            }
        }
        Ok(())
    }

    /// Drive `fut` unless the context is cancelled or times out first.
    pub async fn run<F, T>(&self, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled_by_caller()),
            _ = deadline => Err(deadline_elapsed()),
            result = fut => result,
        }
    }
}

fn cancelled_by_caller() -> EngineError {
    EngineError::Cancelled("cancelled by caller".to_string())
}

fn deadline_elapsed() -> EngineError {
    EngineError::Cancelled("deadline elapsed".to_string())
}
