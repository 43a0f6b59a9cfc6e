//! Error types for the gateway server.

use std::net::SocketAddr;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::debug;
use wseb_proto::ProtoError;
use wseb_session::SessionError;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

const TEXT_PLAIN: &str = "text/plain;charset=UTF-8";

/// Errors that can occur in the gateway server.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// Malformed request; no session state was touched.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No service or session is bound at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The carrier must be reopened at another location.
    #[error("redirect to {0}")]
    Redirect(String),

    /// A session rejected the carrier.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Redirect(_) => StatusCode::MOVED_PERMANENTLY,
            Self::Session(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::BindFailed(_, _) | Self::Internal(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ProtoError> for GatewayError {
    fn from(err: ProtoError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!(status = status.as_u16(), error = %self, "Request rejected");

        if let Self::Redirect(location) = &self {
            return match HeaderValue::from_str(location) {
                Ok(location) => (status, [(header::LOCATION, location)]).into_response(),
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            };
        }

        let mut response = (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN))],
            self.to_string(),
        )
            .into_response();
        if status == StatusCode::BAD_REQUEST {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}
