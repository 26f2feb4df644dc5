//! HTTP side of the user service.
//!
//! The service keeps one inbound listener alive for its whole lifetime.
//! [`HttpServer`] owns that listener: `start` launches a background loop
//! that runs the listener's listen-and-serve call over and over, `stop`
//! shuts it down gracefully within a fixed deadline.
//!
//! ```text
//!   start() ──▶ ┌──────────── serve loop ─────────────┐
//!               │ listen_and_serve(handler, shutdown)  │
//!               │   Ok  (after stop)  -> loop exits    │
//!               │   Err (bind, I/O)   -> log, run again│
//!               └──────────────────────────────────────┘
//!   stop()  ──▶ flag off, cancel shutdown, wait <= 5s
//! ```
//!
//! The listener is a [`Listen`] implementation. [`AxumListener`] serves an
//! axum `Router` over TCP; tests substitute scripted listeners.
//!
//! # Example
//!
//! ```no_run
//! use user_service_web::{HttpServer, handlers::heartbeat_router};
//!
//! # async fn example() -> Result<(), user_service_web::ServeError> {
//! let server = HttpServer::bind(([127, 0, 0, 1], 8080).into());
//! server.use_handler(heartbeat_router());
//! server.start()?;
//!
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{AppError, ServeError};
pub use server::{AxumListener, DEFAULT_SHUTDOWN_TIMEOUT, HttpServer, Listen};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
