//! Kafka-compatible broker clients for the user service.
//!
//! This crate implements the [`MessageSource`] and [`MessageSink`] traits from
//! `user-service-core` on top of rdkafka, so they work against Redpanda,
//! Apache Kafka or any other Kafka-protocol broker.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  producer(topic)   ┌──────────────────┐
//! │    Redpanda     │ ────────────────▶ │ RedpandaProducer │ ◀── service code
//! │   (factory)     │                   └──────────────────┘
//! │                 │  consumer(opts)   ┌──────────────────┐   ┌─────────────┐
//! │   brokers[]     │ ────────────────▶ │  RedpandaSource  │ ─▶│ Consumption │
//! └────────────────┘                    └──────────────────┘   │   Engine    │
//!                                                              └─────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! - Consumers that join a group commit offsets automatically after reading
//!   (at-most-once with respect to subscriber processing)
//! - Ordering is guaranteed within a partition
//! - A read is bounded by the [`Context`](user_service_core::Context) the
//!   engine passes in; closing the source wakes a pending read
//!
//! # Example
//!
//! ```no_run
//! use user_service_core::{ContextProvider, Message};
//! use user_service_redpanda::{ConsumerOptions, ProducerOptions, Redpanda};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kafka = Redpanda::new(["localhost:9092"]);
//!
//! let engine = kafka.consumer(
//!     ContextProvider::timeout(Duration::from_secs(10)),
//!     ConsumerOptions::new("user-tickets").group_id("user-service"),
//! )?;
//! engine.subscribe(|delivery| {
//!     if let Ok(msg) = delivery {
//!         println!("key = {}", msg.key_str());
//!     }
//!     Ok(())
//! });
//!
//! let producer = kafka.producer("user-tickets", ProducerOptions::new())?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod consumer;
mod options;
mod producer;

pub use consumer::RedpandaSource;
pub use options::{ConsumerOptions, ProducerOptions, StartOffset};
pub use producer::RedpandaProducer;

use user_service_core::{ContextProvider, SourceError};
use user_service_runtime::ConsumptionEngine;

/// Factory for producers and consumers sharing one broker list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redpanda {
    brokers: Vec<String>,
}

impl Redpanda {
    /// Create a factory for `brokers` (e.g., `["localhost:9092"]`).
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
        }
    }

    /// The configured broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Create a producer for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ConnectionFailed`] if no broker is configured
    /// or the client cannot be created.
    pub fn producer(
        &self,
        topic: &str,
        options: ProducerOptions,
    ) -> Result<RedpandaProducer, SourceError> {
        RedpandaProducer::connect(&self.bootstrap_servers()?, topic, &options)
    }

    /// Create an idle consumption engine over a new consumer.
    ///
    /// The engine starts reading when its first subscriber is added.
    /// `provider` supplies the context for each read.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ConnectionFailed`] if no broker is configured,
    /// the options are invalid, or the client cannot be created.
    pub fn consumer(
        &self,
        provider: ContextProvider,
        options: ConsumerOptions,
    ) -> Result<ConsumptionEngine<RedpandaSource>, SourceError> {
        let source = RedpandaSource::connect(&self.bootstrap_servers()?, &options)?;
        Ok(ConsumptionEngine::new(source, provider))
    }

    fn bootstrap_servers(&self) -> Result<String, SourceError> {
        if self.brokers.is_empty() {
            return Err(SourceError::ConnectionFailed(
                "Brokers not configured".to_string(),
            ));
        }
        Ok(self.brokers.join(","))
    }
}
