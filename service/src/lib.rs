//! User service.
//!
//! Serves a small HTTP API over user accounts and keeps a ledger of booked
//! tickets fed by a Kafka-compatible topic. The binary in `main.rs` loads [`config::Settings`],
//! builds an [`app::App`], runs it until SIGINT/SIGTERM and stops it under
//! the process shutdown deadline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod routes;
pub mod tickets;
pub mod users;

pub use app::{App, wait_for_signal};
pub use config::{ConfigError, Settings};
pub use tickets::{BookMessage, TicketLedger, UserTicket};
pub use users::{User, UserStore};
