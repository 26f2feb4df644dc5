//! Ticket bookings.
//!
//! The booking service publishes a [`BookMessage`] whenever a user books a
//! ticket. [`book_message_subscriber`] turns those messages into entries in
//! the [`TicketLedger`], which the HTTP API reads back per user.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use user_service_core::{Delivery, SubscriberError, SubscriberResult};
use uuid::Uuid;

/// Payload of a ticket-booked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMessage {
    /// Booking user
    #[serde(rename = "UserId")]
    pub user_id: Uuid,
    /// Booked ticket
    #[serde(rename = "TicketId")]
    pub ticket_id: Uuid,
}

/// One ticket owned by one user, as returned by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTicket {
    /// Owner
    #[serde(rename = "UserId")]
    pub user_id: Uuid,
    /// Ticket
    #[serde(rename = "TicketId")]
    pub ticket_id: Uuid,
}

/// In-memory record of which user holds which tickets.
#[derive(Debug, Default)]
pub struct TicketLedger {
    tickets: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl TicketLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `user_id` holds `ticket_id`.
    ///
    /// Returns `false` if the pair was already recorded; redelivered events
    /// are therefore harmless.
    pub fn add(&self, user_id: Uuid, ticket_id: Uuid) -> bool {
        let mut tickets = self.tickets.write().unwrap_or_else(PoisonError::into_inner);
        let held = tickets.entry(user_id).or_default();
        if held.contains(&ticket_id) {
            return false;
        }
        held.push(ticket_id);
        true
    }

    /// Tickets held by `user_id`, in booking order.
    #[must_use]
    pub fn tickets_for(&self, user_id: Uuid) -> Vec<UserTicket> {
        self.tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .map(|held| {
                held.iter()
                    .map(|&ticket_id| UserTicket { user_id, ticket_id })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of recorded tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Whether no ticket has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subscriber recording ticket-booked events in `ledger`.
///
/// Read errors are logged and skipped: a read that timed out with no message
/// at debug level, anything else as an error. A payload that is not a
/// [`BookMessage`] fails the delivery, which the registry logs with the
/// message key.
pub fn book_message_subscriber(
    ledger: Arc<TicketLedger>,
) -> impl Fn(Delivery<'_>) -> SubscriberResult + Send + Sync + 'static {
    move |delivery: Delivery<'_>| {
        let message = match delivery {
            Ok(message) => message,
            Err(e) if e.is_context() => {
                tracing::debug!(error = %e, "No ticket booked within read timeout");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not read book message");
                return Ok(());
            }
        };

        let booked: BookMessage = message
            .decode_json()
            .map_err(|e| SubscriberError::failed(format!("invalid book message: {e}")))?;

        if ledger.add(booked.user_id, booked.ticket_id) {
            tracing::info!(
                user_id = %booked.user_id,
                ticket_id = %booked.ticket_id,
                "Ticket booked"
            );
        } else {
            tracing::debug!(
                user_id = %booked.user_id,
                ticket_id = %booked.ticket_id,
                "Ticket already recorded"
            );
        }
        Ok(())
    }
}
