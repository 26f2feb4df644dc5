//! Kafka-compatible [`MessageSink`] on an rdkafka `FutureProducer`.

use crate::options::ProducerOptions;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use user_service_core::source::SourceFuture;
use user_service_core::{Context, Message, MessageSink, SourceError};

/// Publishes messages to one topic.
///
/// In synchronous mode (the default) `write` returns after the broker
/// acknowledged the message. With
/// [`async_delivery`](ProducerOptions::async_delivery) it returns as soon as
/// the message is queued locally; `close` flushes whatever is still queued.
pub struct RedpandaProducer {
    producer: FutureProducer,
    topic: String,
    async_delivery: bool,
    timeout: Duration,
    closed: CancellationToken,
}

impl RedpandaProducer {
    /// Create a producer for `topic` against `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ConnectionFailed`] if the client cannot be created.
    pub fn connect(
        brokers: &str,
        topic: impl Into<String>,
        options: &ProducerOptions,
    ) -> Result<Self, SourceError> {
        let topic = topic.into();
        let producer: FutureProducer = options
            .client_config(brokers)
            .create()
            .map_err(|e| SourceError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            async_delivery = options.is_async(),
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            topic,
            async_delivery: options.is_async(),
            timeout: options.delivery_timeout(),
            closed: CancellationToken::new(),
        })
    }

    /// The destination topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn write_failed(&self, reason: impl std::fmt::Display) -> SourceError {
        SourceError::WriteFailed {
            topic: self.topic.clone(),
            reason: reason.to_string(),
        }
    }
}

impl MessageSink for RedpandaProducer {
    fn write<'a>(&'a self, ctx: &'a Context, message: Message) -> SourceFuture<'a, ()> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(SourceError::Closed);
            }
            if let Some(reason) = ctx.err() {
                return Err(reason.into());
            }

            let mut record = FutureRecord::to(&self.topic)
                .key(&message.key)
                .payload(&message.value);
            if let Some(timestamp) = message.timestamp {
                record = record.timestamp(timestamp);
            }

            if self.async_delivery {
                // The delivery future is dropped; the message stays queued.
                return self
                    .producer
                    .send_result(record)
                    .map(drop)
                    .map_err(|(e, _)| self.write_failed(e));
            }

            tokio::select! {
                biased;
                reason = ctx.done() => Err(reason.into()),
                sent = self.producer.send(record, Timeout::After(self.timeout)) => match sent {
                    Ok((partition, offset)) => {
                        tracing::debug!(
                            topic = %self.topic,
                            partition,
                            offset,
                            key = %message.key_str(),
                            "Message published"
                        );
                        Ok(())
                    }
                    Err((e, _)) => {
                        tracing::error!(
                            topic = %self.topic,
                            error = %e,
                            "Failed to publish message"
                        );
                        Err(self.write_failed(e))
                    }
                },
            }
        })
    }

    fn close(&self) -> Result<(), SourceError> {
        self.closed.cancel();
        self.producer
            .flush(Timeout::Never)
            .map_err(|e| self.write_failed(format!("flush failed: {e}")))?;
        tracing::debug!(topic = %self.topic, "Kafka producer flushed and closed");
        Ok(())
    }
}

impl std::fmt::Debug for RedpandaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaProducer")
            .field("topic", &self.topic)
            .field("async_delivery", &self.async_delivery)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}
