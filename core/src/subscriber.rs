//! Subscriber callbacks.
//!
//! A [`Subscriber`] is invoked once per consumed message with a
//! [`Delivery`]: either the message or the read error the engine got instead
//! of one. Read errors are delivered like messages; the subscriber decides
//! whether to log and move on or escalate.
//!
//! Subscribers report their own failures through [`SubscriberResult`]. The
//! engine logs a failure with the message key and keeps going with the next
//! subscriber.

use crate::message::Message;
use crate::source::SourceError;
use std::sync::Arc;
use thiserror::Error;

/// What a subscriber receives for one iteration of the consumption loop.
///
/// Every subscriber sees the same borrowed value for a given delivery.
pub type Delivery<'a> = Result<&'a Message, &'a SourceError>;

/// Why a subscriber failed to process a delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriberError {
    /// The subscriber returned an error
    #[error("subscriber failed: {0}")]
    Failed(String),

    /// The subscriber panicked; the payload is the panic message
    #[error("subscriber panicked: {0}")]
    Panicked(String),
}

impl SubscriberError {
    /// Build a [`SubscriberError::Failed`] from any displayable error.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }
}

/// Result of a single subscriber invocation.
pub type SubscriberResult = Result<(), SubscriberError>;

/// A callback registered on the consumption engine.
///
/// Owned by whoever registered it; the engine only calls it.
pub type Subscriber = Arc<dyn for<'a> Fn(Delivery<'a>) -> SubscriberResult + Send + Sync>;
