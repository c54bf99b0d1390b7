use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Config
    #[error("config not found (searched: {searched:?})")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("config parse error in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    // Keys
    #[error("key load error: {0}")]
    KeyLoad(String),

    #[error("key resolution error: {0}")]
    KeyResolution(String),

    #[error("key size error: expected {expected} bytes, got {actual}")]
    KeySize { expected: usize, actual: usize },

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    // JOSE
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    /// Deliberately carries no detail.
    #[error("decryption failed")]
    Decryption,

    // Authorization
    #[error("redirect URI not allowed")]
    RedirectUriNotAllowed,

    #[error("invalid request object: {0}")]
    InvalidRequestObject(String),

    #[error("invalid request_uri: {0}")]
    InvalidRequestUri(String),

    #[error("invalid token binding: {0}")]
    InvalidTokenBinding(String),

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("missing authentication")]
    Unauthenticated,

    // OAuth client
    #[error("invalid client")]
    InvalidClient,

    #[error("invalid grant")]
    InvalidGrant,

    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    // General
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<String>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::Config(_)
            | Self::KeyLoad(_)
            | Self::Signing(_)
            | Self::Encryption(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::InvalidToken | Self::Unauthenticated | Self::InvalidClient => {
                StatusCode::UNAUTHORIZED
            }

            Self::KeyResolution(_)
            | Self::KeySize { .. }
            | Self::UnsupportedAlgorithm(_)
            | Self::MalformedToken(_)
            | Self::Decode(_)
            | Self::Decryption
            | Self::RedirectUriNotAllowed
            | Self::InvalidRequestObject(_)
            | Self::InvalidRequestUri(_)
            | Self::InvalidTokenBinding(_)
            | Self::InvalidGrant
            | Self::UnsupportedGrantType(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// OAuth-style error code (short, stable string).
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::ConfigParse { .. } => "config_parse_error",
            Self::Config(_) => "config_error",
            Self::KeyLoad(_) | Self::Signing(_) | Self::Encryption(_) | Self::Internal(_) => {
                "server_error"
            }
            Self::KeyResolution(_)
            | Self::KeySize { .. }
            | Self::UnsupportedAlgorithm(_)
            | Self::MalformedToken(_)
            | Self::Decode(_)
            | Self::Decryption
            | Self::InvalidRequestObject(_) => "invalid_request_object",
            Self::RedirectUriNotAllowed => "invalid_redirect_uri",
            Self::InvalidRequestUri(_) => "invalid_request_uri",
            Self::InvalidTokenBinding(_) | Self::BadRequest(_) => "invalid_request",
            Self::InvalidToken => "invalid_token",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log internal errors, don't expose details to client
        let error_description = if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
            None
        } else {
            Some(self.to_string())
        };

        let body = ErrorBody {
            error: self.error_code().to_string(),
            error_description,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
