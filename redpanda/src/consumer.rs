//! Kafka-compatible [`MessageSource`] on an rdkafka `StreamConsumer`.

use crate::options::{ConsumerOptions, StartOffset};
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message as KafkaMessage};
use tokio_util::sync::CancellationToken;
use user_service_core::source::SourceFuture;
use user_service_core::{Context, Message, MessageSource, SourceError};

/// Reads one message at a time from a topic.
///
/// With a group id the consumer subscribes and offsets are committed
/// automatically; with a fixed partition it is assigned that partition
/// directly and never commits.
///
/// `close` unsubscribes and makes every later read fail with
/// [`SourceError::Closed`], including a read that is already waiting.
pub struct RedpandaSource {
    consumer: StreamConsumer,
    topic: String,
    closed: CancellationToken,
}

impl RedpandaSource {
    /// Create a consumer for `options` against `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ConnectionFailed`] if the options are invalid
    /// or the client cannot be created or subscribed.
    pub fn connect(brokers: &str, options: &ConsumerOptions) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = options
            .client_config(brokers)?
            .create()
            .map_err(|e| SourceError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        let topic = options.topic().to_string();
        match options.fixed_partition() {
            Some(partition) => {
                let offset = match options.initial_offset() {
                    Some(StartOffset::Earliest) => Offset::Beginning,
                    Some(StartOffset::Latest) => Offset::End,
                    None => Offset::Stored,
                };
                let mut assignment = TopicPartitionList::new();
                assignment
                    .add_partition_offset(&topic, partition, offset)
                    .map_err(|e| SourceError::ConnectionFailed(format!("Invalid partition: {e}")))?;
                consumer.assign(&assignment).map_err(|e| {
                    SourceError::ConnectionFailed(format!("Failed to assign partition: {e}"))
                })?;
            }
            None => {
                consumer.subscribe(&[topic.as_str()]).map_err(|e| {
                    SourceError::ConnectionFailed(format!("Failed to subscribe to topic: {e}"))
                })?;
            }
        }

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            partition = ?options.fixed_partition(),
            "Kafka consumer created"
        );

        Ok(Self {
            consumer,
            topic,
            closed: CancellationToken::new(),
        })
    }

    /// The consumed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl MessageSource for RedpandaSource {
    fn read<'a>(&'a self, ctx: &'a Context) -> SourceFuture<'a, Message> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(SourceError::Closed);
            }

            tokio::select! {
                biased;
                () = self.closed.cancelled() => Err(SourceError::Closed),
                reason = ctx.done() => Err(reason.into()),
                received = self.consumer.recv() => match received {
                    Ok(borrowed) => Ok(to_message(&borrowed)),
                    Err(e) => Err(SourceError::ReadFailed(e.to_string())),
                },
            }
        })
    }

    fn close(&self) -> Result<(), SourceError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        self.consumer.unsubscribe();
        tracing::debug!(topic = %self.topic, "Kafka consumer closed");
        Ok(())
    }
}

impl std::fmt::Debug for RedpandaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaSource")
            .field("topic", &self.topic)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn to_message(borrowed: &BorrowedMessage<'_>) -> Message {
    let mut message = Message::new(
        borrowed.key().unwrap_or_default(),
        borrowed.payload().unwrap_or_default(),
    )
    .with_position(borrowed.topic(), borrowed.partition(), borrowed.offset());
    message.timestamp = borrowed.timestamp().to_millis();
    message
}
