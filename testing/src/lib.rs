//! # User Service Testing
//!
//! Testing utilities for the user service crates.
//!
//! This crate provides:
//! - [`InMemorySource`]: a message source tests push messages and errors into
//! - [`InMemorySink`]: a message sink that records writes
//! - [`LogCapture`]: thread-local capture of `tracing` output
//!
//! ## Example
//!
//! ```ignore
//! use user_service_core::{ContextProvider, Message};
//! use user_service_runtime::ConsumptionEngine;
//! use user_service_testing::InMemorySource;
//!
//! #[tokio::test]
//! async fn test_ticket_flow() {
//!     let source = InMemorySource::new();
//!     let engine = ConsumptionEngine::new(source.clone(), ContextProvider::background());
//!     engine.subscribe(|delivery| { /* ... */ Ok(()) });
//!
//!     source.push(Message::new("user-1", r#"{"UserId": "..."}"#));
//! }
//! ```

/// Capture of `tracing` output
pub mod logs;

/// In-memory message source and sink
pub mod source_mocks;

// Re-export commonly used items
pub use logs::LogCapture;
pub use source_mocks::{InMemorySink, InMemorySource};
