//! Consumer and producer options.
//!
//! Every option is unset by default, which leaves the librdkafka default in
//! place. Options are turned into a [`ClientConfig`] when a client is built;
//! invalid combinations are rejected at that point.

use rdkafka::config::ClientConfig;
use std::time::Duration;
use user_service_core::SourceError;

/// Where a consumer without a committed offset starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// The oldest retained message
    Earliest,
    /// Only messages produced after the consumer started
    Latest,
}

impl StartOffset {
    const fn as_config(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// Options for a [`RedpandaSource`](crate::RedpandaSource).
///
/// A consumer either joins a consumer group (`group_id`) or reads a single
/// fixed `partition`, never both.
///
/// # Example
///
/// ```
/// use user_service_redpanda::{ConsumerOptions, StartOffset};
///
/// let options = ConsumerOptions::new("user-tickets")
///     .group_id("user-service")
///     .start_offset(StartOffset::Earliest)
///     .max_bytes(10 * 1024 * 1024);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerOptions {
    topic: String,
    group_id: Option<String>,
    partition: Option<i32>,
    queue_capacity: Option<usize>,
    min_bytes: Option<usize>,
    max_bytes: Option<usize>,
    start_offset: Option<StartOffset>,
}

impl ConsumerOptions {
    /// Options for consuming `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Join the consumer group `group_id`.
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Read only `partition`, outside any consumer group.
    #[must_use]
    pub const fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Minimum number of messages to keep prefetched.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Minimum bytes the broker accumulates before answering a fetch.
    #[must_use]
    pub const fn min_bytes(mut self, bytes: usize) -> Self {
        self.min_bytes = Some(bytes);
        self
    }

    /// Maximum bytes returned by one fetch.
    #[must_use]
    pub const fn max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = Some(bytes);
        self
    }

    /// Where to start when no offset has been committed.
    #[must_use]
    pub const fn start_offset(mut self, offset: StartOffset) -> Self {
        self.start_offset = Some(offset);
        self
    }

    /// The topic to consume.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The fixed partition, if any.
    #[must_use]
    pub const fn fixed_partition(&self) -> Option<i32> {
        self.partition
    }

    /// The start offset, if set.
    #[must_use]
    pub const fn initial_offset(&self) -> Option<StartOffset> {
        self.start_offset
    }

    /// Check the options for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ConnectionFailed`] describing the first problem:
    /// a missing topic, both a group and a partition, a negative partition,
    /// a zero byte limit, or `min_bytes` above `max_bytes`.
    pub fn validate(&self) -> Result<(), SourceError> {
        let invalid = |reason: &str| Err(SourceError::ConnectionFailed(format!(
            "invalid consumer options: {reason}"
        )));

        if self.topic.is_empty() {
            return invalid("topic is required");
        }
        if self.group_id.is_some() && self.partition.is_some() {
            return invalid("either a group id or a partition may be set, not both");
        }
        if self.partition.is_some_and(|p| p < 0) {
            return invalid("partition must not be negative");
        }
        if self.min_bytes == Some(0) || self.max_bytes == Some(0) {
            return invalid("byte limits must be positive");
        }
        if let (Some(min), Some(max)) = (self.min_bytes, self.max_bytes) {
            if min > max {
                return invalid("min_bytes must not exceed max_bytes");
            }
        }
        Ok(())
    }

    /// Build the client configuration for `brokers`.
    pub(crate) fn client_config(&self, brokers: &str) -> Result<ClientConfig, SourceError> {
        self.validate()?;

        // Partition readers still need a group id for librdkafka; they never commit.
        let group_id = self
            .group_id
            .clone()
            .unwrap_or_else(|| format!("user-service-{}", self.topic));

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("group.id", &group_id)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000");

        if self.group_id.is_none() {
            config.set("enable.auto.commit", "false");
        }
        if let Some(capacity) = self.queue_capacity {
            config.set("queued.min.messages", capacity.to_string());
        }
        if let Some(bytes) = self.min_bytes {
            config.set("fetch.min.bytes", bytes.to_string());
        }
        if let Some(bytes) = self.max_bytes {
            config.set("fetch.max.bytes", bytes.to_string());
        }
        if let Some(offset) = self.start_offset {
            config.set("auto.offset.reset", offset.as_config());
        }
        Ok(config)
    }
}

/// Options for a [`RedpandaProducer`](crate::RedpandaProducer).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerOptions {
    batch_size: Option<usize>,
    batch_bytes: Option<usize>,
    async_delivery: bool,
    timeout: Option<Duration>,
}

impl ProducerOptions {
    /// Default options: synchronous delivery, library batching.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of messages per batch.
    #[must_use]
    pub const fn batch_size(mut self, messages: usize) -> Self {
        self.batch_size = Some(messages);
        self
    }

    /// Maximum size of a batch in bytes.
    #[must_use]
    pub const fn batch_bytes(mut self, bytes: usize) -> Self {
        self.batch_bytes = Some(bytes);
        self
    }

    /// Return from `write` once the message is queued, without waiting for
    /// the broker acknowledgement.
    #[must_use]
    pub const fn async_delivery(mut self, enabled: bool) -> Self {
        self.async_delivery = enabled;
        self
    }

    /// Delivery timeout for one message (default: 5 seconds).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) const fn is_async(&self) -> bool {
        self.async_delivery
    }

    pub(crate) fn delivery_timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(5))
    }

    pub(crate) fn client_config(&self, brokers: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set(
                "message.timeout.ms",
                self.delivery_timeout().as_millis().to_string(),
            );

        if let Some(messages) = self.batch_size.filter(|n| *n > 0) {
            config.set("batch.num.messages", messages.to_string());
        }
        if let Some(bytes) = self.batch_bytes.filter(|n| *n > 0) {
            config.set("batch.size", bytes.to_string());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn unset_options_leave_library_defaults() {
        let config = ConsumerOptions::new("user-tickets")
            .group_id("user-service")
            .client_config("localhost:9092")
            .unwrap();

        assert_eq!(config.get("group.id"), Some("user-service"));
        assert_eq!(config.get("fetch.min.bytes"), None);
        assert_eq!(config.get("auto.offset.reset"), None);
        assert_eq!(config.get("enable.auto.commit"), None);
    }

    #[test]
    fn set_options_map_to_client_config() {
        let config = ConsumerOptions::new("user-tickets")
            .partition(2)
            .queue_capacity(500)
            .min_bytes(1)
            .max_bytes(1_048_576)
            .start_offset(StartOffset::Earliest)
            .client_config("localhost:9092")
            .unwrap();

        assert_eq!(config.get("group.id"), Some("user-service-user-tickets"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("queued.min.messages"), Some("500"));
        assert_eq!(config.get("fetch.min.bytes"), Some("1"));
        assert_eq!(config.get("fetch.max.bytes"), Some("1048576"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
    }

    #[test]
    fn contradictory_options_are_rejected() {
        assert!(ConsumerOptions::new("").validate().is_err());
        assert!(
            ConsumerOptions::new("t")
                .group_id("g")
                .partition(0)
                .validate()
                .is_err()
        );
        assert!(ConsumerOptions::new("t").partition(-1).validate().is_err());
        assert!(
            ConsumerOptions::new("t")
                .min_bytes(10)
                .max_bytes(5)
                .validate()
                .is_err()
        );
        assert!(ConsumerOptions::new("t").max_bytes(0).validate().is_err());
    }

    #[test]
    fn producer_options_map_batching() {
        let options = ProducerOptions::new()
            .batch_size(100)
            .batch_bytes(0)
            .async_delivery(true)
            .timeout(Duration::from_secs(2));
        let config = options.client_config("localhost:9092");

        assert!(options.is_async());
        assert_eq!(config.get("batch.num.messages"), Some("100"));
        assert_eq!(config.get("batch.size"), None);
        assert_eq!(config.get("message.timeout.ms"), Some("2000"));
    }
}
