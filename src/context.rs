//! # Execution Context
//!
//! Cancellation and deadline propagation for every phase operation.
//!
//! A context is cheap to clone. Children inherit cancellation from their parent
//! and can only tighten the deadline, never extend it:
//!
//! ```rust
//! use remote_make::context::ExecutionContext;
//! use std::time::Duration;
//!
//! let task_ctx = ExecutionContext::with_timeout(Duration::from_secs(3600));
//! let step_ctx = task_ctx.child_with_timeout(Duration::from_secs(360));
//! assert!(step_ctx.remaining().unwrap() <= Duration::from_secs(360));
//!
//! task_ctx.cancel();
//! assert!(step_ctx.is_cancelled());
//! ```

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context-bounded wait stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::background()
    }
}

impl ExecutionContext {
    /// Root context: never cancelled by a parent, no deadline
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Root context with a deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Child sharing this deadline; cancelling the child leaves the parent alone
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child whose deadline is the earlier of the parent's and `timeout` from now
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check the context without waiting
    pub fn check(&self) -> Result<(), ContextError> {
        if self.is_cancelled() {
            Err(ContextError::Cancelled)
        } else if self.is_expired() {
            Err(ContextError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Drive `fut` until it finishes, the context is cancelled, or the deadline passes
    ///
    /// The future is dropped when interrupted.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        self.check()?;

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
            _ = expired => Err(ContextError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_within_budget() {
        let ctx = ExecutionContext::with_timeout(Duration::from_secs(5));
        let value = ctx.run(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = ExecutionContext::with_timeout(Duration::from_millis(20));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let parent = ExecutionContext::background();
        let child = parent.child_with_timeout(Duration::from_secs(10));

        let waiter = {
            let child = child.clone();
            tokio::spawn(async move { child.run(std::future::pending::<()>()).await })
        };
        parent.cancel();

        let result = waiter.await.unwrap();
        assert_eq!(result, Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_child_cancellation_does_not_reach_parent() {
        let parent = ExecutionContext::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_child_never_extends_deadline() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let parent = ExecutionContext::with_timeout(Duration::from_millis(100));
            let child = parent.child_with_timeout(Duration::from_secs(60));
            assert_eq!(child.deadline(), parent.deadline());

            let tighter = parent.child_with_timeout(Duration::from_millis(10));
            assert!(tighter.deadline().unwrap() < parent.deadline().unwrap());
        });
    }

    #[tokio::test]
    async fn test_already_cancelled_short_circuits() {
        let ctx = ExecutionContext::background();
        ctx.cancel();
        assert_eq!(ctx.check(), Err(ContextError::Cancelled));
        assert_eq!(ctx.run(async { 1 }).await, Err(ContextError::Cancelled));
    }
}
