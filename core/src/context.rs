//! Cancellable, optionally time-limited contexts.
//!
//! Every blocking call the service makes against an external resource (a
//! broker read, a connection close, a server drain) is bounded by a
//! [`Context`]. A context ends for one of two reasons, reported as a
//! [`ContextError`]: it was cancelled, or its deadline passed.
//!
//! Dropping a context cancels it. That makes the drop the "release" step: a
//! context created for a single read is released as soon as the read
//! returns and the value goes out of scope.
//!
//! # Example
//!
//! ```
//! use user_service_core::context::{Context, ContextError};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = Context::with_timeout(Duration::from_millis(10));
//! assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`Context`] ended.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context (or one of its parents) was cancelled
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation token paired with an optional deadline.
///
/// Contexts are not `Clone`: each one owns its token and cancels it on drop.
/// Pass `&Context` to the calls it bounds, and derive children with
/// [`Context::child_with_timeout`] when a nested call needs a tighter limit.
#[derive(Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never expires on its own.
    ///
    /// It only ends when [`Context::cancel`] is called or it is dropped.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// A context cancelled whenever `parent` is cancelled.
    ///
    /// Use this to thread a single long-lived cancellation token through a
    /// series of short-lived contexts.
    #[must_use]
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            deadline: None,
        }
    }

    /// A child of this context whose deadline is at most `timeout` from now.
    ///
    /// The child inherits cancellation and keeps the parent's deadline when
    /// it is earlier.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The underlying cancellation token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Why the context has ended, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context ends and report why.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => ContextError::Cancelled,
                    () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Drive `fut` until it completes or the context ends.
    ///
    /// The future is dropped when the context wins.
    ///
    /// # Errors
    ///
    /// Returns the [`ContextError`] if the context ends first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        tokio::select! {
            biased;
            output = fut => Ok(output),
            reason = self.done() => Err(reason),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Factory producing a fresh [`Context`] on every call.
///
/// The consumption engine asks its provider for a new context before each
/// read and drops it right after, so no context is ever reused across reads.
#[derive(Clone)]
pub struct ContextProvider {
    make: Arc<dyn Fn() -> Context + Send + Sync>,
}

impl ContextProvider {
    /// Wrap an arbitrary factory function.
    pub fn new<F>(make: F) -> Self
    where
        F: Fn() -> Context + Send + Sync + 'static,
    {
        Self {
            make: Arc::new(make),
        }
    }

    /// Contexts that never expire on their own.
    #[must_use]
    pub fn background() -> Self {
        Self::new(Context::background)
    }

    /// Contexts that expire `timeout` after they are created.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::new(move || Context::with_timeout(timeout))
    }

    /// Contexts that are children of `token`.
    ///
    /// Cancelling `token` ends the context of a read that is already in
    /// flight, not just the next one.
    #[must_use]
    pub fn cancel_with(token: CancellationToken) -> Self {
        Self::new(move || Context::child_of(&token))
    }

    /// Children of `token` that also expire `timeout` after creation.
    #[must_use]
    pub fn cancel_with_timeout(token: CancellationToken, timeout: Duration) -> Self {
        Self::new(move || {
            let mut ctx = Context::child_of(&token);
            ctx.deadline = Some(Instant::now() + timeout);
            ctx
        })
    }

    /// Produce a fresh context.
    #[must_use]
    pub fn provide(&self) -> Context {
        (self.make)()
    }
}

impl std::fmt::Debug for ContextProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextProvider").finish_non_exhaustive()
    }
}
