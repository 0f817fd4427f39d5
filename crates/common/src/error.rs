use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Coarse classification of a failed call to an external system.
///
/// The retry table is expressed in terms of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalErrorKind {
    /// Connection refused, reset, DNS failure.
    Connection,
    Timeout,
    /// 5xx response.
    Server,
    /// 4xx response or rejected input.
    Client,
    /// Response could not be decoded.
    Decode,
}

impl std::fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalErrorKind::Connection => write!(f, "connection"),
            ExternalErrorKind::Timeout => write!(f, "timeout"),
            ExternalErrorKind::Server => write!(f, "server"),
            ExternalErrorKind::Client => write!(f, "client"),
            ExternalErrorKind::Decode => write!(f, "decode"),
        }
    }
}

impl std::str::FromStr for ExternalErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connection" => Ok(ExternalErrorKind::Connection),
            "timeout" => Ok(ExternalErrorKind::Timeout),
            "server" => Ok(ExternalErrorKind::Server),
            "client" => Ok(ExternalErrorKind::Client),
            "decode" => Ok(ExternalErrorKind::Decode),
            other => Err(format!("unknown error kind '{}'", other)),
        }
    }
}

/// Errors that can tell the retry executor what kind of failure they are.
pub trait Classify {
    fn kind(&self) -> ExternalErrorKind;
}

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Resource store error ({kind}): {message}")]
    Store {
        kind: ExternalErrorKind,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Store { kind, .. } => match kind {
                ExternalErrorKind::Client => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
                _ => (StatusCode::BAD_GATEWAY, self.to_string()),
            },
            AppError::Decode(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
