//! Message consumption engine.
//!
//! [`ConsumptionEngine`] pulls one message at a time from a
//! [`MessageSource`] and broadcasts it to every registered subscriber. The
//! loop itself is a [`LoopController`]; the first [`subscribe`] starts it.
//!
//! # One iteration
//!
//! 1. Ask the [`ContextProvider`] for a fresh context.
//! 2. Read one message (or error) with it, then drop the context.
//! 3. Broadcast the delivery on the blocking pool and wait for it to finish.
//!
//! Because each iteration waits for its broadcast, deliveries never overlap
//! and message N+1 is not read before every subscriber has seen message N.
//!
//! Read errors are broadcast exactly like messages. The engine does not
//! classify or retry them.
//!
//! # Shutdown
//!
//! [`close`] stops the loop and then closes the source under a bounded
//! teardown. [`close_only`] releases the source without stopping the loop:
//! the next read then fails with [`SourceError::Closed`], which is broadcast
//! on every iteration until someone calls [`stop`].
//!
//! [`subscribe`]: ConsumptionEngine::subscribe
//! [`close`]: ConsumptionEngine::close
//! [`close_only`]: ConsumptionEngine::close_only
//! [`stop`]: ConsumptionEngine::stop

use crate::controller::{Iteration, LoopController};
use crate::metrics::{CONSUMER_MESSAGES, CONSUMER_READ_ERRORS, record_broadcast};
use crate::registry::SubscriberRegistry;
use crate::teardown::{TeardownError, bounded_teardown};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use user_service_core::{
    Context, ContextProvider, Delivery, Message, MessageSource, SourceError, Subscriber,
    SubscriberResult,
};

/// Single-reader pull loop with ordered, synchronous fan-out.
pub struct ConsumptionEngine<S: MessageSource> {
    source: Arc<S>,
    registry: Arc<SubscriberRegistry>,
    provider: ContextProvider,
    controller: LoopController,
}

impl<S: MessageSource> ConsumptionEngine<S> {
    /// Create an idle engine reading from `source`.
    ///
    /// `provider` is called once per iteration for the read context.
    #[must_use]
    pub fn new(source: S, provider: ContextProvider) -> Self {
        Self::from_arc(Arc::new(source), provider)
    }

    /// Create an idle engine over a shared source.
    #[must_use]
    pub fn from_arc(source: Arc<S>, provider: ContextProvider) -> Self {
        Self {
            source,
            registry: Arc::new(SubscriberRegistry::new()),
            provider,
            controller: LoopController::new("consumer"),
        }
    }

    /// Register a subscriber and make sure the loop is running.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(Delivery<'_>) -> SubscriberResult + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(subscriber));
    }

    /// Register a shared subscriber and make sure the loop is running.
    pub fn subscribe_arc(&self, subscriber: Subscriber) {
        self.registry.add(subscriber);
        self.start();
    }

    /// Start the loop if it is idle. Returns whether a new loop was launched.
    pub fn start(&self) -> bool {
        self.controller.start(|| ConsumeLoop {
            source: Arc::clone(&self.source),
            registry: Arc::clone(&self.registry),
            provider: self.provider.clone(),
        })
    }

    /// Ask the loop to stop before its next read. Does not wait.
    pub fn stop(&self) -> bool {
        self.controller.stop()
    }

    /// Stop the loop, then close the source within `ctx`.
    ///
    /// A read already in flight is not interrupted; the loop exits once it
    /// returns. Use [`wait_stopped`](Self::wait_stopped) to observe that.
    ///
    /// # Errors
    ///
    /// - [`TeardownError::Operation`] if the source failed to close
    /// - [`TeardownError::DeadlineExceeded`] / [`TeardownError::Cancelled`]
    ///   if `ctx` ended first (the close keeps running)
    pub async fn close(&self, ctx: &Context) -> Result<(), TeardownError<SourceError>> {
        self.stop();
        self.close_only(ctx).await
    }

    /// Close the source within `ctx` without stopping the loop.
    ///
    /// # Errors
    ///
    /// Same as [`close`](Self::close).
    pub async fn close_only(&self, ctx: &Context) -> Result<(), TeardownError<SourceError>> {
        let source = Arc::clone(&self.source);
        let result = bounded_teardown(ctx, move || source.close()).await;
        match &result {
            Ok(()) => tracing::info!("Message source closed"),
            Err(e) => tracing::warn!(error = %e, "Message source close did not complete"),
        }
        result
    }

    /// Read one message directly from the source, bypassing subscribers.
    ///
    /// Competes with the loop for messages if the loop is running.
    ///
    /// # Errors
    ///
    /// Whatever the source's read returns.
    pub async fn consume(&self, ctx: &Context) -> Result<Message, SourceError> {
        self.source.read(ctx).await
    }

    /// Resolves once the latest loop run has exited.
    pub fn wait_stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        self.controller.wait_stopped()
    }

    /// Whether the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    /// Number of loop tasks launched so far.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.controller.runs()
    }

    /// Number of read-and-broadcast iterations completed.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.controller.iterations()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// The underlying source.
    #[must_use]
    pub const fn source(&self) -> &Arc<S> {
        &self.source
    }
}

impl<S: MessageSource> std::fmt::Debug for ConsumptionEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumptionEngine")
            .field("controller", &self.controller)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

struct ConsumeLoop<S> {
    source: Arc<S>,
    registry: Arc<SubscriberRegistry>,
    provider: ContextProvider,
}

#[async_trait]
impl<S: MessageSource> Iteration for ConsumeLoop<S> {
    async fn run_once(&mut self) {
        let result = {
            let ctx = self.provider.provide();
            self.source.read(&ctx).await
        };

        match &result {
            Ok(msg) => {
                metrics::counter!(CONSUMER_MESSAGES).increment(1);
                tracing::trace!(
                    key = %msg.key_str(),
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "Message received"
                );
            }
            Err(e) => {
                metrics::counter!(CONSUMER_READ_ERRORS).increment(1);
                tracing::debug!(error = %e, "Read failed, delivering error to subscribers");
            }
        }

        let registry = Arc::clone(&self.registry);
        let started = Instant::now();
        let dispatched =
            tokio::task::spawn_blocking(move || registry.broadcast(result.as_ref())).await;
        record_broadcast(started.elapsed());

        if let Err(e) = dispatched {
            tracing::error!(error = %e, "Broadcast task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use user_service_testing::InMemorySource;

    #[tokio::test]
    async fn consume_reads_without_starting_the_loop() {
        let source = InMemorySource::new();
        let engine = ConsumptionEngine::new(source.clone(), ContextProvider::background());
        source.push(Message::new("direct", "v"));

        let msg = engine.consume(&Context::background()).await.unwrap();

        assert_eq!(msg.key_str(), "direct");
        assert!(!engine.is_running());
        assert_eq!(engine.iterations(), 0);
    }

    #[tokio::test]
    async fn first_subscribe_starts_the_loop() {
        let source = InMemorySource::new();
        let engine = ConsumptionEngine::new(source.clone(), ContextProvider::background());
        assert!(!engine.is_running());

        engine.subscribe(|_| Ok(()));
        engine.subscribe(|_| Ok(()));

        assert!(engine.is_running());
        assert_eq!(engine.runs(), 1);
        assert_eq!(engine.subscriber_count(), 2);

        engine.stop();
        source.push(Message::new("wake", ""));
        engine.wait_stopped().await;
    }

    #[tokio::test]
    async fn messages_reach_subscribers_in_order() {
        let source = InMemorySource::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let engine = ConsumptionEngine::new(source.clone(), ContextProvider::background());

        let log = Arc::clone(&seen);
        engine.subscribe(move |delivery| {
            log.lock().unwrap().push(delivery.unwrap().key_str().into_owned());
            Ok(())
        });

        source.push(Message::new("a", ""));
        source.push(Message::new("b", ""));
        tokio::time::timeout(Duration::from_secs(2), async {
            while engine.iterations() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), ["a", "b"]);
        engine.close(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
    }

    #[tokio::test]
    async fn read_context_timeouts_are_delivered_as_errors() {
        let source = InMemorySource::new();
        let errors: Arc<Mutex<Vec<SourceError>>> = Arc::default();
        let engine = ConsumptionEngine::new(
            source.clone(),
            ContextProvider::timeout(Duration::from_millis(10)),
        );

        let log = Arc::clone(&errors);
        engine.subscribe(move |delivery| {
            if let Err(e) = delivery {
                log.lock().unwrap().push(e.clone());
            }
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        engine.stop();
        engine.wait_stopped().await;

        let errors = errors.lock().unwrap();
        assert!(!errors.is_empty());
        assert!(errors.iter().all(SourceError::is_context));
    }
}
