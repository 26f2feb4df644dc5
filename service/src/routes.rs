//! HTTP routes.
//!
//! ```text
//! GET /ping               -> "pong"
//! GET /health             -> {"status":"ok"}
//! GET /metrics            -> Prometheus text (503 when metrics are disabled)
//! GET /user/:id/tickets   -> [{"UserId": ..., "TicketId": ...}]
//! GET /user               -> [{"Id": ..., "Email": ..., "Name": ..., "Surname": ...}]
//! POST /user              -> "<new id>"
//! GET /user/:id           -> {"Id": ...}, or 204 for an unknown user
//! PUT /user/:id           -> "ok", or 204 for an unknown user
//! DELETE /user/:id        -> "ok", or 204 for an unknown user
//! ```
//!
//! A path id that is not a UUID is answered with 400 `wrong id`, a body that
//! is not a user with 400 and the decoder's message.

use crate::tickets::{TicketLedger, UserTicket};
use crate::users::{User, UserStore};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use user_service_runtime::MetricsExporter;
use user_service_web::handlers::heartbeat_router;
use user_service_web::{AppError, WebResult};
use uuid::Uuid;

/// Shared state of the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Ticket ledger filled by the consumer
    pub ledger: Arc<TicketLedger>,
    /// User accounts
    pub users: Arc<UserStore>,
    /// Prometheus exporter, if installed
    pub metrics: MetricsExporter,
}

/// Build the service router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(heartbeat_router())
        .route("/metrics", get(metrics))
        .route("/user", get(list_users).post(add_user))
        .route("/user/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/user/:id/tickets", get(user_tickets))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /user/:id/tickets`
///
/// An unknown user simply has no tickets.
#[allow(clippy::unused_async)]
async fn user_tickets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> WebResult<Json<Vec<UserTicket>>> {
    let user_id = parse_id(&id)?;
    Ok(Json(state.ledger.tickets_for(user_id)))
}

/// `GET /user`
#[allow(clippy::unused_async)]
async fn list_users(State(state): State<AppState>) -> Json<Vec<User>> {
    Json(state.users.list())
}

/// `GET /user/:id`
#[allow(clippy::unused_async)]
async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> WebResult<Response> {
    let id = parse_id(&id)?;
    Ok(state.users.get(id).map_or_else(
        || StatusCode::NO_CONTENT.into_response(),
        |user| Json(user).into_response(),
    ))
}

/// `POST /user`
#[allow(clippy::unused_async)]
async fn add_user(
    State(state): State<AppState>,
    body: Result<Json<User>, JsonRejection>,
) -> WebResult<Json<String>> {
    let Json(user) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    Ok(Json(state.users.add(user).to_string()))
}

/// `PUT /user/:id`
///
/// The path id wins over any id in the body.
#[allow(clippy::unused_async)]
async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<User>, JsonRejection>,
) -> WebResult<Response> {
    let id = parse_id(&id)?;
    let Json(user) = body.map_err(|e| AppError::bad_request(e.body_text()))?;

    if state.users.update(User { id, ..user }) {
        Ok(Json("ok").into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

/// `DELETE /user/:id`
#[allow(clippy::unused_async)]
async fn delete_user(State(state): State<AppState>, Path(id): Path<String>) -> WebResult<Response> {
    let id = parse_id(&id)?;
    if state.users.delete(id) {
        Ok(Json("ok").into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

fn parse_id(raw: &str) -> WebResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request("wrong id"))
}

/// `GET /metrics`
#[allow(clippy::unused_async)]
async fn metrics(State(state): State<AppState>) -> WebResult<String> {
    state
        .metrics
        .render()
        .ok_or_else(|| AppError::unavailable("metrics are disabled"))
}
