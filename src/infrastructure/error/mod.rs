use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors produced by the realtime client.
///
/// `ConnectionRefused` and `Timeout` are consumed by the reconnection policy
/// and only reach the host application as state events. `ExhaustedRetries`
/// is carried by the `Failed` event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handler for channel {channel} failed: {message}")]
    Handler { channel: String, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Exhausted {attempts} reconnection attempts")]
    ExhaustedRetries { attempts: u32 },

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection manager has been shut down")]
    Shutdown,
}

impl ClientError {
    /// Short machine-readable code, used for metric labels and ops responses.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::ConnectionRefused(_) => "CONNECTION_REFUSED",
            ClientError::InvalidUrl(_) => "INVALID_URL",
            ClientError::Protocol(_) => "PROTOCOL_ERROR",
            ClientError::Handler { .. } => "HANDLER_ERROR",
            ClientError::Timeout(_) => "TIMEOUT",
            ClientError::ExhaustedRetries { .. } => "EXHAUSTED_RETRIES",
            ClientError::ConnectionClosed(_) => "CONNECTION_CLOSED",
            ClientError::Serialization(_) => "SERIALIZATION_ERROR",
            ClientError::Config(_) => "CONFIG_ERROR",
            ClientError::Shutdown => "SHUTDOWN",
        }
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(e: config::ConfigError) -> Self {
        ClientError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for ClientError {
    fn into_response(self) -> Response {
        let status = match &self {
            ClientError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            ClientError::Config(_) | ClientError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = self.code();

        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %self,
            "Ops API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
