//! Bounded teardown: race a cleanup operation against a [`Context`].
//!
//! Closing a broker connection or draining an HTTP listener can hang on a
//! misbehaving peer. The helpers here run the cleanup on its own execution
//! unit and return whichever finishes first: the cleanup, or the context.
//!
//! When the context wins, the cleanup is **not** stopped. It keeps running
//! in the background and its result is discarded. Only use these helpers for
//! operations that are safe to abandon (closing a socket, flushing a
//! producer) and that do not mutate state the caller observes afterwards.
//!
//! # Example
//!
//! ```rust
//! use user_service_core::Context;
//! use user_service_runtime::teardown::{bounded_teardown, TeardownError};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ctx = Context::with_timeout(Duration::from_millis(50));
//! let result = bounded_teardown(&ctx, || {
//!     std::thread::sleep(Duration::from_millis(500));
//!     Ok::<_, std::io::Error>(())
//! })
//! .await;
//!
//! assert!(matches!(result, Err(TeardownError::DeadlineExceeded)));
//! # }
//! ```

use crate::metrics::TEARDOWN_ABANDONED;
use std::future::Future;
use thiserror::Error;
use tokio::task::JoinHandle;
use user_service_core::{Context, ContextError};

/// Outcome of a bounded teardown that did not succeed.
#[derive(Error, Debug)]
pub enum TeardownError<E> {
    /// The operation finished first and returned an error
    #[error("teardown failed: {0}")]
    Operation(E),

    /// The context deadline passed first; the operation is still running
    #[error("teardown deadline exceeded")]
    DeadlineExceeded,

    /// The context was cancelled first; the operation is still running
    #[error("teardown cancelled")]
    Cancelled,

    /// The operation's task panicked or was aborted
    #[error("teardown task aborted: {0}")]
    Aborted(String),
}

impl<E> TeardownError<E> {
    /// Whether the context ended before the operation did.
    #[must_use]
    pub const fn is_abandoned(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }
}

impl<E> From<ContextError> for TeardownError<E> {
    fn from(reason: ContextError) -> Self {
        match reason {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Run a blocking operation on the blocking pool, bounded by `ctx`.
///
/// # Errors
///
/// - [`TeardownError::Operation`] if `op` returned an error in time
/// - [`TeardownError::DeadlineExceeded`] / [`TeardownError::Cancelled`] if
///   `ctx` ended first (`op` keeps running)
/// - [`TeardownError::Aborted`] if `op` panicked
pub async fn bounded_teardown<F, T, E>(ctx: &Context, op: F) -> Result<T, TeardownError<E>>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    race(ctx, tokio::task::spawn_blocking(op)).await
}

/// Run an async operation on its own task, bounded by `ctx`.
///
/// Same contract as [`bounded_teardown`], for cleanups that are futures.
///
/// # Errors
///
/// See [`bounded_teardown`].
pub async fn bounded_teardown_async<Fut, T, E>(
    ctx: &Context,
    op: Fut,
) -> Result<T, TeardownError<E>>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    race(ctx, tokio::spawn(op)).await
}

async fn race<T, E>(
    ctx: &Context,
    handle: JoinHandle<Result<T, E>>,
) -> Result<T, TeardownError<E>> {
    tokio::select! {
        biased;
        joined = handle => match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TeardownError::Operation(e)),
            Err(join_error) => Err(TeardownError::Aborted(join_error.to_string())),
        },
        reason = ctx.done() => {
            // Dropping the handle detaches the task; it runs to completion unobserved.
            metrics::counter!(TEARDOWN_ABANDONED, "reason" => abandon_reason(reason)).increment(1);
            tracing::debug!(reason = %reason, "Teardown abandoned, operation left running");
            Err(reason.into())
        }
    }
}

const fn abandon_reason(reason: ContextError) -> &'static str {
    match reason {
        ContextError::Cancelled => "cancelled",
        ContextError::DeadlineExceeded => "deadline_exceeded",
    }
}
