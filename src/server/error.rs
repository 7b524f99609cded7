use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type AppResult<T> = Result<T, Error>;

/// coarse classification of a failure, what callers switch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    StreamNotFound,
    ServerTokenNotFound,
    PlaylistNotReceived,
    Timeout,
    RateLimited,
    UnexpectedError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::StreamNotFound => "stream_not_found",
            Self::ServerTokenNotFound => "server_token_not_found",
            Self::PlaylistNotReceived => "playlist_not_received",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::UnexpectedError => "unexpected_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("stream not found")]
    StreamNotFound,

    #[error("playback access token not found")]
    ServerTokenNotFound,

    // detail only ever holds upstream error codes, never the body
    #[error("playlist not received ({status}): {detail}")]
    PlaylistNotReceived { status: u16, detail: String },

    #[error("request timed out")]
    Timeout,

    #[error("too many requests, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    // context is for the logs, clients get a generic message
    #[error("unexpected error: {0}")]
    UnexpectedError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::StreamNotFound => ErrorKind::StreamNotFound,
            Self::ServerTokenNotFound => ErrorKind::ServerTokenNotFound,
            Self::PlaylistNotReceived { .. } => ErrorKind::PlaylistNotReceived,
            Self::Timeout => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::UnexpectedError(_) => ErrorKind::UnexpectedError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::StreamNotFound | Self::ServerTokenNotFound => StatusCode::NOT_FOUND,
            Self::PlaylistNotReceived { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// what the client gets to read
    pub fn public_message(&self) -> String {
        match self {
            Self::UnexpectedError(_) => "unexpected error".to_string(),
            Self::PlaylistNotReceived { detail, .. } if detail.is_empty() => {
                "playlist not received".to_string()
            }
            Self::PlaylistNotReceived { detail, .. } => format!("playlist not received: {}", detail),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Self::UnexpectedError(context) = &self {
            error!("unexpected error reached the response boundary: {}", context);
        }

        let status = self.status_code();
        let retry_after = match &self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.public_message(),
            }),
        )
            .into_response();

        if let Some(seconds) = retry_after
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        response
    }
}
