//! # User Service Core
//!
//! Core traits and types shared by the user service crates.
//!
//! The service runs two long-lived loops: an HTTP listener and a message
//! consumer that pulls "ticket booked" events from a Kafka-compatible broker.
//! This crate holds the vocabulary both loops are written against:
//!
//! - [`message::Message`]: a broker record (key, value, position metadata)
//! - [`context::Context`]: a cancellable, optionally time-limited context
//! - [`source::MessageSource`] / [`source::MessageSink`]: the broker seams
//! - [`subscriber::Subscriber`]: a callback invoked once per consumed message
//!
//! ## Example
//!
//! ```ignore
//! use user_service_core::context::Context;
//! use user_service_core::source::MessageSource;
//! use std::time::Duration;
//!
//! async fn read_one(source: &impl MessageSource) {
//!     let ctx = Context::with_timeout(Duration::from_secs(10));
//!     match source.read(&ctx).await {
//!         Ok(message) => println!("key = {:?}", message.key_str()),
//!         Err(e) => eprintln!("read failed: {e}"),
//!     }
//! }
//! ```

#![forbid(unsafe_code)]

pub mod context;
pub mod message;
pub mod source;
pub mod subscriber;

// Re-export commonly used types
pub use context::{Context, ContextError, ContextProvider};
pub use message::Message;
pub use source::{MessageSink, MessageSource, SourceError};
pub use subscriber::{Delivery, Subscriber, SubscriberError, SubscriberResult};
