//! Error types for the HTTP layer.
//!
//! [`ServeError`] is what a listener returns when one listen-and-serve run
//! ends badly. [`AppError`] is what request handlers return; it implements
//! Axum's `IntoResponse` so handlers can use `?`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Why a listen-and-serve run ended with a failure.
#[derive(Error, Debug)]
pub enum ServeError {
    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The accept loop failed after binding
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    /// `start` was called before a handler was attached
    #[error("no request handler attached")]
    MissingHandler,
}

impl ServeError {
    /// Whether the failure happened while binding the socket.
    #[must_use]
    pub const fn is_bind(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }
}

/// Error returned by request handlers.
///
/// # Examples
///
/// ```ignore
/// async fn tickets(Path(id): Path<String>) -> Result<Json<Vec<Uuid>>, AppError> {
///     let id = Uuid::parse_str(&id).map_err(|_| AppError::bad_request("invalid user id"))?;
///     Ok(Json(ledger.tickets_for(id)))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    /// Internal error, logged but never sent to the client
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error with an explicit status and code.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the internal cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{resource} with id {id} not found"),
        )
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    /// The response status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = AppError::bad_request("invalid user id");
        assert_eq!(err.to_string(), "[BAD_REQUEST] invalid user id");
    }

    #[test]
    fn not_found_names_the_resource() {
        let err = AppError::not_found("User", "42");
        assert_eq!(err.to_string(), "[NOT_FOUND] User with id 42 not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn anyhow_errors_become_opaque_500s() {
        let err: AppError = anyhow::anyhow!("ledger poisoned").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("poisoned"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn bind_errors_are_classified() {
        let err = ServeError::Bind {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.is_bind());
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:8080"));
        assert!(!ServeError::MissingHandler.is_bind());
    }
}
