//! Ordered subscriber registry with isolated dispatch.
//!
//! Subscribers are appended under a single lock and invoked in registration
//! order, synchronously, under that same lock. This gives three guarantees:
//!
//! - delivery order per message equals registration order
//! - broadcasts of different messages never interleave
//! - a subscriber added while a broadcast is in flight first sees the next
//!   message, because `add` waits for the broadcast to release the lock
//!
//! A slow subscriber therefore delays every later delivery and every new
//! registration.
//!
//! ## Failure isolation
//!
//! Each invocation is isolated. A subscriber that returns an error or panics
//! is logged with the message key and counted in the [`DispatchReport`]; the
//! remaining subscribers still run and the registry stays usable.

use crate::metrics::CONSUMER_SUBSCRIBER_FAILURES;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};
use user_service_core::{Delivery, Subscriber, SubscriberError, SubscriberResult};

/// Outcome of broadcasting one delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that returned `Ok(())`
    pub delivered: usize,
    /// Subscribers that returned an error or panicked
    pub failed: usize,
}

/// Append-only, ordered set of subscribers.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber. Blocks while a broadcast is in flight.
    pub fn add(&self, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every subscriber, in registration order, with `delivery`.
    pub fn broadcast(&self, delivery: Delivery<'_>) -> DispatchReport {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut report = DispatchReport::default();
        for (index, subscriber) in subscribers.iter().enumerate() {
            match dispatch(subscriber, delivery) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!(CONSUMER_SUBSCRIBER_FAILURES).increment(1);
                    let key = delivery.map(|m| m.key_str().into_owned()).unwrap_or_default();
                    match delivery {
                        Ok(_) => tracing::error!(
                            subscriber = index,
                            key = %key,
                            error = %e,
                            "Could not process message"
                        ),
                        Err(read_error) => tracing::error!(
                            subscriber = index,
                            read_error = %read_error,
                            error = %e,
                            "Could not process read error"
                        ),
                    }
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

fn dispatch(subscriber: &Subscriber, delivery: Delivery<'_>) -> SubscriberResult {
    catch_unwind(AssertUnwindSafe(|| subscriber(delivery)))
        .unwrap_or_else(|payload| Err(SubscriberError::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
