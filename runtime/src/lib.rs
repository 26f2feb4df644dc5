//! # User Service Runtime
//!
//! Process lifecycle and concurrent resource management for the user service.
//!
//! ## Core Components
//!
//! - **Bounded Teardown** ([`teardown`]): race a blocking cleanup against a
//!   [`Context`](user_service_core::Context) deadline
//! - **Loop Controller** ([`controller`]): idempotent start/stop of one
//!   background loop that stops only between iterations
//! - **Subscriber Registry** ([`registry`]): ordered, panic-isolated fan-out
//! - **Consumption Engine** ([`consumer`]): single-reader pull loop over a
//!   [`MessageSource`](user_service_core::MessageSource)
//! - **Restart policies** ([`retry`]) and **metrics** ([`metrics`])
//!
//! ## Example
//!
//! ```ignore
//! use user_service_core::{Context, ContextProvider};
//! use user_service_runtime::ConsumptionEngine;
//! use std::time::Duration;
//!
//! let engine = ConsumptionEngine::new(source, ContextProvider::timeout(Duration::from_secs(10)));
//! engine.subscribe(|delivery| {
//!     if let Ok(msg) = delivery {
//!         tracing::info!(key = %msg.key_str(), "Got message");
//!     }
//!     Ok(())
//! });
//!
//! // Later, on shutdown
//! engine.close(&Context::with_timeout(Duration::from_secs(5))).await?;
//! ```

/// Single-reader message consumption engine
pub mod consumer;

/// Idempotent start/stop controller for background loops
pub mod controller;

/// Prometheus metrics for observability
pub mod metrics;

/// Ordered subscriber registry with isolated dispatch
pub mod registry;

/// Restart and backoff policies
pub mod retry;

/// Deadline-bounded cleanup operations
pub mod teardown;

pub use consumer::ConsumptionEngine;
pub use controller::{Iteration, LoopController, RunState};
pub use metrics::{MetricsError, MetricsExporter};
pub use registry::{DispatchReport, SubscriberRegistry};
pub use retry::{RestartPolicy, RetryPolicy};
pub use teardown::{TeardownError, bounded_teardown, bounded_teardown_async};
