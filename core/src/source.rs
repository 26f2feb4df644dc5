//! Message source and sink abstractions.
//!
//! The consumption engine is written against [`MessageSource`]: a blocking
//! "read one message" primitive plus a blocking close. Service code that
//! publishes messages uses [`MessageSink`]. Both are implemented on top of
//! rdkafka by `user-service-redpanda` and in memory by `user-service-testing`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        read(ctx)        ┌─────────────────────┐
//! │  Kafka / Redpanda │ ─────────────────────▶ │ Consumption Engine  │
//! │     (broker)      │                        │  (one read at once) │
//! └──────────────────┘                         └──────────┬──────────┘
//!          ▲                                              │ broadcast
//!          │ write(ctx, msg)                              ▼
//! ┌──────────────────┐                         ┌─────────────────────┐
//! │   Service code    │                        │     Subscribers     │
//! └──────────────────┘                         └─────────────────────┘
//! ```
//!
//! # Cancellation
//!
//! `read` and `write` take a [`Context`]; implementations must return once
//! the context ends. `close` takes none: it is a plain blocking call, and
//! callers that need a bound wrap it in a bounded teardown.

use crate::context::{Context, ContextError};
use crate::message::Message;
use futures::future::BoxFuture;
use thiserror::Error;

/// Errors produced by message sources and sinks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Failed to connect to (or configure a client for) the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to read the next message
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Failed to write a message to a topic
    #[error("Write failed for topic '{topic}': {reason}")]
    WriteFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// The source or sink has been closed
    #[error("Source closed")]
    Closed,

    /// The bounding context ended before the operation completed
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The broker returned a message the client could not interpret
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl SourceError {
    /// Whether the error came from the bounding context rather than the broker.
    #[must_use]
    pub const fn is_context(&self) -> bool {
        matches!(self, Self::Context(_))
    }
}

/// Boxed future returned by source and sink operations.
pub type SourceFuture<'a, T> = BoxFuture<'a, Result<T, SourceError>>;

/// A pull-based source of broker messages.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the engine reads from a background
/// task while `close` may be called from any other task or thread.
pub trait MessageSource: Send + Sync + 'static {
    /// Block until the next message is available or `ctx` ends.
    ///
    /// # Errors
    ///
    /// - [`SourceError::Context`] if `ctx` ends first
    /// - [`SourceError::Closed`] if the source has been closed
    /// - [`SourceError::ReadFailed`] on broker or transport failures
    fn read<'a>(&'a self, ctx: &'a Context) -> SourceFuture<'a, Message>;

    /// Release the underlying connection.
    ///
    /// This is a blocking call with no cancellation awareness. Reads issued
    /// after a close fail with [`SourceError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the client fails to shut down cleanly.
    fn close(&self) -> Result<(), SourceError>;
}

/// A sink that publishes messages to a broker topic.
pub trait MessageSink: Send + Sync + 'static {
    /// Publish `message`, returning once the sink accepted it or `ctx` ended.
    ///
    /// # Errors
    ///
    /// - [`SourceError::Context`] if `ctx` ends first
    /// - [`SourceError::WriteFailed`] if the broker rejects the message
    /// - [`SourceError::Closed`] if the sink has been closed
    fn write<'a>(&'a self, ctx: &'a Context, message: Message) -> SourceFuture<'a, ()>;

    /// Flush buffered messages and release the connection.
    ///
    /// Blocking, with no cancellation awareness.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered messages could not be flushed.
    fn close(&self) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_errors_convert() {
        let err: SourceError = ContextError::DeadlineExceeded.into();
        assert!(err.is_context());
        assert_eq!(err.to_string(), "context deadline exceeded");
    }

    #[test]
    fn write_failed_names_the_topic() {
        let err = SourceError::WriteFailed {
            topic: "user-tickets".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Write failed for topic 'user-tickets': broker down"
        );
    }
}
